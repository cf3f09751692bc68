//! Ordered setup script execution
//!
//! Scripts live in the config tree as `NN-<name>.sh` and run in ascending
//! `(order, name)`. Output streams line-oriented to the sync log. A non-zero
//! exit aborts the remaining scripts; the failing script is recorded in the
//! returned error.

use crate::{AgentError, Cmd, CommandRunner, Result, SyncState};
use std::path::{Path, PathBuf};

/// A script discovered in the config tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredScript {
    /// Full file name, e.g. `10-base.sh`
    pub name: String,
    /// Numeric priority parsed from the leading `NN-`
    pub order: i32,
    pub path: PathBuf,
}

/// Find `NN-<name>.sh` scripts and sort them into execution order
pub fn discover_scripts(dir: &Path) -> Vec<DiscoveredScript> {
    let mut scripts = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return scripts,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if !name.ends_with(".sh") {
            continue;
        }
        let order = match name.split('-').next().and_then(|p| p.parse::<i32>().ok()) {
            Some(order) => order,
            None => {
                tracing::warn!("Skipping script without numeric prefix: {:?}", name);
                continue;
            }
        };
        scripts.push(DiscoveredScript { name, order, path });
    }

    scripts.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    scripts
}

/// Run scripts sequentially. On the first non-zero exit, the remaining
/// scripts are aborted and `ScriptFailed` is returned. Completed scripts
/// are recorded in the sync state.
pub async fn run_scripts(
    runner: &dyn CommandRunner,
    scripts: &[DiscoveredScript],
    work_dir: &Path,
    state: &mut SyncState,
) -> Result<()> {
    std::fs::create_dir_all(work_dir)?;

    for script in scripts {
        let work_path = work_dir.join(&script.name);
        std::fs::copy(&script.path, &work_path)?;
        set_executable(&work_path)?;

        tracing::info!(target: "sync", "running script {}", script.name);
        let out = runner
            .run_streamed(&Cmd::new("sh").arg(work_path.display().to_string()))
            .await?;

        if !out.success() {
            return Err(AgentError::ScriptFailed {
                name: script.name.clone(),
                code: out.exit_code,
            });
        }

        let _ = std::fs::remove_file(&work_path);
        state.scripts_completed.insert(script.name.clone(), 0);
    }

    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn write_script(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\ntrue\n").unwrap();
        path
    }

    #[test]
    fn test_discover_orders_by_priority_then_name() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(tmp.path(), "20-zeta.sh");
        write_script(tmp.path(), "10-base.sh");
        write_script(tmp.path(), "20-alpha.sh");
        write_script(tmp.path(), "notes.txt");
        write_script(tmp.path(), "unordered.sh");

        let scripts = discover_scripts(tmp.path());
        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["10-base.sh", "20-alpha.sh", "20-zeta.sh"]);
    }

    #[tokio::test]
    async fn test_run_scripts_records_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let scripts_dir = tmp.path().join("scripts");
        std::fs::create_dir_all(&scripts_dir).unwrap();
        write_script(&scripts_dir, "10-base.sh");
        write_script(&scripts_dir, "20-finish.sh");

        let runner = ScriptedRunner::new();
        let mut state = SyncState::default();
        let scripts = discover_scripts(&scripts_dir);
        run_scripts(&runner, &scripts, &tmp.path().join("work"), &mut state)
            .await
            .unwrap();

        assert_eq!(state.scripts_completed.len(), 2);
        assert!(state.scripts_completed.contains_key("10-base.sh"));
        // Work files removed after success
        assert!(!tmp.path().join("work/10-base.sh").exists());
    }

    #[tokio::test]
    async fn test_failing_script_aborts_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let scripts_dir = tmp.path().join("scripts");
        std::fs::create_dir_all(&scripts_dir).unwrap();
        write_script(&scripts_dir, "10-first.sh");
        write_script(&scripts_dir, "20-mid.sh");
        write_script(&scripts_dir, "30-last.sh");

        let work = tmp.path().join("work");
        let fail_path = work.join("20-mid.sh").display().to_string();
        let runner = ScriptedRunner::new().on(&format!("sh {}", fail_path), 3, "");

        let mut state = SyncState::default();
        let scripts = discover_scripts(&scripts_dir);
        let err = run_scripts(&runner, &scripts, &work, &mut state)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Script \"20-mid.sh\" failed with exit code 3"
        );
        // First script completed, third never ran
        assert!(state.scripts_completed.contains_key("10-first.sh"));
        assert!(!state.scripts_completed.contains_key("30-last.sh"));
        assert_eq!(runner.call_count(&format!("sh {}", work.join("30-last.sh").display())), 0);
    }
}

//! OS and package manager detection
//!
//! Reads the standard release-info file first, then falls back to probing
//! for the package manager executables. The result is computed once per
//! process and handed to the sync engine.

use crate::{AgentError, CommandRunner, Result};
use haus_config::PackageManagerKind;
use std::path::Path;

/// Detected system facts
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// `ID` from os-release ("debian", "alpine", ...), or "unknown"
    pub os_id: String,
    /// The distro-native package manager
    pub native_manager: PackageManagerKind,
}

/// Detect the OS and its native package manager.
///
/// `os_release` is the path of the release-info file (normally
/// `/etc/os-release`; injectable for tests).
pub fn detect_system(runner: &dyn CommandRunner, os_release: &Path) -> Result<SystemInfo> {
    let (os_id, from_release) = match std::fs::read_to_string(os_release) {
        Ok(content) => {
            let id = os_release_field(&content, "ID").unwrap_or_default();
            let id_like = os_release_field(&content, "ID_LIKE").unwrap_or_default();
            (id.clone(), manager_for_distro(&id, &id_like))
        }
        Err(_) => (String::from("unknown"), None),
    };

    if let Some(manager) = from_release {
        return Ok(SystemInfo {
            os_id,
            native_manager: manager,
        });
    }

    // Release file missing or unrecognized: probe for the tools directly
    let probed = [
        ("apt-get", PackageManagerKind::Apt),
        ("apk", PackageManagerKind::Apk),
        ("dnf", PackageManagerKind::Dnf),
        ("yum", PackageManagerKind::Dnf),
    ]
    .into_iter()
    .find(|(tool, _)| runner.has_command(tool));

    match probed {
        Some((_, manager)) => Ok(SystemInfo {
            os_id,
            native_manager: manager,
        }),
        None => Err(AgentError::DetectFailed(format!(
            "unrecognized distribution {:?} and no known package manager on PATH",
            os_id
        ))),
    }
}

/// Extract a field from os-release content, stripping optional quotes
fn os_release_field(content: &str, field: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix('=')?;
        Some(rest.trim().trim_matches('"').to_string())
    })
}

fn manager_for_distro(id: &str, id_like: &str) -> Option<PackageManagerKind> {
    let matches_any = |needle: &[&str]| {
        needle.contains(&id) || id_like.split_whitespace().any(|l| needle.contains(&l))
    };

    if matches_any(&["debian", "ubuntu"]) {
        Some(PackageManagerKind::Apt)
    } else if matches_any(&["alpine"]) {
        Some(PackageManagerKind::Apk)
    } else if matches_any(&["rhel", "fedora", "centos", "rocky", "almalinux"]) {
        Some(PackageManagerKind::Dnf)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use std::io::Write;

    fn write_os_release(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_detect_debian() {
        let file = write_os_release("ID=debian\nVERSION_ID=\"12\"\n");
        let runner = ScriptedRunner::new();
        let info = detect_system(&runner, file.path()).unwrap();
        assert_eq!(info.os_id, "debian");
        assert_eq!(info.native_manager, PackageManagerKind::Apt);
    }

    #[test]
    fn test_detect_quoted_id() {
        let file = write_os_release("NAME=\"Alpine Linux\"\nID=\"alpine\"\n");
        let runner = ScriptedRunner::new();
        let info = detect_system(&runner, file.path()).unwrap();
        assert_eq!(info.native_manager, PackageManagerKind::Apk);
    }

    #[test]
    fn test_detect_via_id_like() {
        let file = write_os_release("ID=linuxmint\nID_LIKE=\"ubuntu debian\"\n");
        let runner = ScriptedRunner::new();
        let info = detect_system(&runner, file.path()).unwrap();
        assert_eq!(info.native_manager, PackageManagerKind::Apt);
    }

    #[test]
    fn test_detect_rhel_family() {
        let file = write_os_release("ID=rocky\nID_LIKE=\"rhel centos fedora\"\n");
        let runner = ScriptedRunner::new();
        let info = detect_system(&runner, file.path()).unwrap();
        assert_eq!(info.native_manager, PackageManagerKind::Dnf);
    }

    #[test]
    fn test_detect_falls_back_to_probe() {
        let file = write_os_release("ID=sillyos\n");
        let runner = ScriptedRunner::new().with_command("apk");
        let info = detect_system(&runner, file.path()).unwrap();
        assert_eq!(info.native_manager, PackageManagerKind::Apk);
    }

    #[test]
    fn test_detect_missing_release_file_probes() {
        let runner = ScriptedRunner::new().with_command("dnf");
        let info = detect_system(&runner, Path::new("/nonexistent/os-release")).unwrap();
        assert_eq!(info.native_manager, PackageManagerKind::Dnf);
    }

    #[test]
    fn test_detect_failure_is_fatal() {
        let runner = ScriptedRunner::new();
        let err = detect_system(&runner, Path::new("/nonexistent/os-release")).unwrap_err();
        assert!(matches!(err, AgentError::DetectFailed(_)));
    }
}

//! Git-sync mode: keep the config tree in step with a repository branch
//!
//! Enabled when a `ConfigRepo` is configured. The tree is cloned shallow on
//! first run and hard-reset to the remote branch afterwards. The applied
//! commit hash is recorded in sync state.

use crate::{AgentError, Cmd, CommandRunner, Result};
use haus_config::ConfigRepo;
use std::path::Path;

/// Clone or update the config tree from the repository.
/// Returns the commit hash now checked out.
pub async fn sync_repo(
    runner: &dyn CommandRunner,
    repo: &ConfigRepo,
    dest: &Path,
) -> Result<String> {
    let dest_str = dest.display().to_string();

    if dest.join(".git").is_dir() {
        run_git(
            runner,
            &["-C", &dest_str, "fetch", "origin", &repo.branch],
        )
        .await?;
        let remote_ref = format!("origin/{}", repo.branch);
        run_git(runner, &["-C", &dest_str, "reset", "--hard", &remote_ref]).await?;
    } else {
        run_git(
            runner,
            &[
                "clone",
                "--branch",
                &repo.branch,
                "--depth",
                "1",
                &repo.url,
                &dest_str,
            ],
        )
        .await?;
    }

    let out = runner
        .run(&Cmd::new("git").args(["-C", &dest_str, "rev-parse", "HEAD"]))
        .await?;
    if !out.success() {
        return Err(AgentError::GitSync(format!(
            "rev-parse exited {}",
            out.exit_code
        )));
    }
    Ok(out.stdout.trim().to_string())
}

async fn run_git(runner: &dyn CommandRunner, args: &[&str]) -> Result<()> {
    let out = runner
        .run_streamed(&Cmd::new("git").args(args.iter().copied()))
        .await?;
    if out.success() {
        Ok(())
    } else {
        Err(AgentError::GitSync(format!(
            "git {} exited {}",
            args.first().copied().unwrap_or_default(),
            out.exit_code
        )))
    }
}

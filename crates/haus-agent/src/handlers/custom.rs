//! Custom package protocol
//!
//! Each entry is `name|check_cmd|install_cmd[|timeout]`. The check command
//! decides whether the entry is already satisfied; the install command runs
//! under a timeout; the check is re-run afterwards to verify.
//!
//! Operator caveat: commands execute under the system shell as root with no
//! sandboxing.

use super::InstallSummary;
use crate::{Cmd, CommandRunner, CustomEntry};

/// Execute custom entries, accumulating installed/skipped/failed counters
pub async fn run_custom_entries(
    runner: &dyn CommandRunner,
    entries: &[CustomEntry],
) -> InstallSummary {
    let mut summary = InstallSummary::default();

    for entry in entries {
        match runner.run(&Cmd::shell(&entry.check_cmd)).await {
            Ok(out) if out.success() => {
                tracing::info!(target: "sync", "{}: already present, skipping", entry.name);
                summary.skipped += 1;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("{}: check command failed to run: {}", entry.name, e);
                summary.failed += 1;
                continue;
            }
        }

        tracing::info!(target: "sync", "{}: installing", entry.name);
        let install = runner
            .run_streamed(&Cmd::shell(&entry.install_cmd).timeout(entry.timeout))
            .await;
        match install {
            Ok(out) if out.success() => {}
            Ok(out) => {
                tracing::warn!(
                    "{}: install command exited {}",
                    entry.name,
                    out.exit_code
                );
                summary.failed += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!("{}: install failed: {}", entry.name, e);
                summary.failed += 1;
                continue;
            }
        }

        // Verify with the check command after a successful install
        match runner.run(&Cmd::shell(&entry.check_cmd)).await {
            Ok(out) if out.success() => summary.installed += 1,
            _ => {
                tracing::warn!("{}: install ran but verification check failed", entry.name);
                summary.failed += 1;
            }
        }
    }

    summary
}

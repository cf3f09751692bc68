//! apt handler (Debian/Ubuntu)

use super::PackageHandler;
use crate::{strip_version, Cmd, CommandRunner, AgentError, Result};
use async_trait::async_trait;
use haus_config::PackageManagerKind;
use std::sync::Arc;

pub struct AptHandler {
    runner: Arc<dyn CommandRunner>,
}

impl AptHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PackageHandler for AptHandler {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apt
    }

    async fn available(&self) -> bool {
        self.runner.has_command("apt-get")
    }

    async fn update_index(&self) -> Result<()> {
        let out = self
            .runner
            .run_streamed(
                &Cmd::new("apt-get")
                    .arg("update")
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            )
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::PackageCommand(format!(
                "apt-get update exited {}",
                out.exit_code
            )))
        }
    }

    async fn is_installed(&self, name: &str) -> Result<bool> {
        let name = strip_version(name);
        let out = self
            .runner
            .run(
                &Cmd::new("dpkg-query")
                    .args(["-W", "-f=${Status}"])
                    .arg(name),
            )
            .await?;
        Ok(out.success() && out.stdout.contains("install ok installed"))
    }

    async fn install(&self, names: &[String]) -> Result<()> {
        let out = self
            .runner
            .run_streamed(
                &Cmd::new("apt-get")
                    .args(["install", "-y", "--no-install-recommends"])
                    .args(names.iter().cloned())
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            )
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::PackageCommand(format!(
                "apt-get install exited {}",
                out.exit_code
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    #[tokio::test]
    async fn test_is_installed_reads_dpkg_status() {
        let runner = Arc::new(
            ScriptedRunner::new().on("dpkg-query -W -f=${Status} curl", 0, "install ok installed"),
        );
        let handler = AptHandler::new(runner);
        assert!(handler.is_installed("curl").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_installed_false_for_deinstalled() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("dpkg-query -W -f=${Status} old", 0, "deinstall ok config-files"),
        );
        let handler = AptHandler::new(runner);
        assert!(!handler.is_installed("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_installed_strips_version_suffix() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("dpkg-query -W -f=${Status} nodejs", 0, "install ok installed"),
        );
        let handler = AptHandler::new(runner.clone());
        assert!(handler.is_installed("nodejs=24.*").await.unwrap());
        assert_eq!(runner.call_count("dpkg-query -W -f=${Status} nodejs"), 1);
    }

    #[tokio::test]
    async fn test_install_batches_all_names() {
        let runner = Arc::new(ScriptedRunner::new());
        let handler = AptHandler::new(runner.clone());
        handler
            .install(&["curl".to_string(), "git".to_string()])
            .await
            .unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("install -y"));
        assert!(calls[0].contains("curl git"));
    }

    #[tokio::test]
    async fn test_update_index_failure_is_error() {
        let runner = Arc::new(ScriptedRunner::new().on("apt-get update", 100, ""));
        let handler = AptHandler::new(runner);
        assert!(handler.update_index().await.is_err());
    }
}

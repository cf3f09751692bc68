//! apk handler (Alpine)

use super::PackageHandler;
use crate::{strip_version, AgentError, Cmd, CommandRunner, Result};
use async_trait::async_trait;
use haus_config::PackageManagerKind;
use std::sync::Arc;

pub struct ApkHandler {
    runner: Arc<dyn CommandRunner>,
}

impl ApkHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PackageHandler for ApkHandler {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apk
    }

    async fn available(&self) -> bool {
        self.runner.has_command("apk")
    }

    async fn update_index(&self) -> Result<()> {
        let out = self.runner.run_streamed(&Cmd::new("apk").arg("update")).await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::PackageCommand(format!(
                "apk update exited {}",
                out.exit_code
            )))
        }
    }

    async fn is_installed(&self, name: &str) -> Result<bool> {
        let name = strip_version(name);
        let out = self
            .runner
            .run(&Cmd::new("apk").args(["info", "-e"]).arg(name))
            .await?;
        Ok(out.success())
    }

    async fn install(&self, names: &[String]) -> Result<()> {
        let out = self
            .runner
            .run_streamed(
                &Cmd::new("apk")
                    .args(["add", "--no-progress"])
                    .args(names.iter().cloned()),
            )
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::PackageCommand(format!(
                "apk add exited {}",
                out.exit_code
            )))
        }
    }
}

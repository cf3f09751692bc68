//! pip handler (pip3 preferred, pip fallback)

use super::PackageHandler;
use crate::{strip_version, AgentError, Cmd, CommandRunner, Result};
use async_trait::async_trait;
use haus_config::PackageManagerKind;
use std::sync::Arc;

pub struct PipHandler {
    runner: Arc<dyn CommandRunner>,
}

impl PipHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn tool(&self) -> &'static str {
        if self.runner.has_command("pip3") {
            "pip3"
        } else {
            "pip"
        }
    }
}

#[async_trait]
impl PackageHandler for PipHandler {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Pip
    }

    async fn available(&self) -> bool {
        self.runner.has_command("pip3") || self.runner.has_command("pip")
    }

    async fn update_index(&self) -> Result<()> {
        // pip resolves against the remote index at install time
        Ok(())
    }

    async fn is_installed(&self, name: &str) -> Result<bool> {
        let name = strip_version(name);
        let out = self
            .runner
            .run(&Cmd::new(self.tool()).arg("show").arg(name))
            .await?;
        Ok(out.success())
    }

    async fn install(&self, names: &[String]) -> Result<()> {
        let out = self
            .runner
            .run_streamed(
                &Cmd::new(self.tool())
                    .arg("install")
                    .args(names.iter().cloned()),
            )
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::PackageCommand(format!(
                "{} install exited {}",
                self.tool(),
                out.exit_code
            )))
        }
    }
}

//! dnf handler (RHEL family), works on both dnf and yum hosts

use super::PackageHandler;
use crate::{strip_version, AgentError, Cmd, CommandRunner, Result};
use async_trait::async_trait;
use haus_config::PackageManagerKind;
use std::sync::Arc;

pub struct DnfHandler {
    runner: Arc<dyn CommandRunner>,
}

impl DnfHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `dnf` where present, `yum` otherwise
    fn tool(&self) -> &'static str {
        if self.runner.has_command("dnf") {
            "dnf"
        } else {
            "yum"
        }
    }
}

#[async_trait]
impl PackageHandler for DnfHandler {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Dnf
    }

    async fn available(&self) -> bool {
        self.runner.has_command("dnf") || self.runner.has_command("yum")
    }

    async fn update_index(&self) -> Result<()> {
        let out = self
            .runner
            .run_streamed(&Cmd::new(self.tool()).args(["makecache", "-y"]))
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::PackageCommand(format!(
                "{} makecache exited {}",
                self.tool(),
                out.exit_code
            )))
        }
    }

    async fn is_installed(&self, name: &str) -> Result<bool> {
        // Existence check goes to the RPM database, not the resolver
        let name = strip_version(name);
        let out = self.runner.run(&Cmd::new("rpm").arg("-q").arg(name)).await?;
        Ok(out.success())
    }

    async fn install(&self, names: &[String]) -> Result<()> {
        let out = self
            .runner
            .run_streamed(
                &Cmd::new(self.tool())
                    .args(["install", "-y"])
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

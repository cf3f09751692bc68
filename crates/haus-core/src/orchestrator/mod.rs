//! The provisioning pipeline
//!
//! Five fixed phases per job: create (0–20%), start (20–35%), deploy
//! (35–60%), sync (60–90%), finalize (90–100%). Cancellation is checked
//! between phases and before each script; the remote shell is closed on
//! every exit path. On any fatal error the container transitions to `error`
//! and a single error event carries a user-safe message.

mod create;
mod deploy;
mod finalize;
mod sync;

use crate::{
    ContainerRecord, ContainerStore, CoreError, EventBus, Lifecycle, ProgressReporter, Result,
    SecretBox,
};
use haus_config::{ContainerCreationJob, Template, Timeouts};
use haus_pve::{ContainerShell, PveClient, ShellCommand, SshShell};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Opens shell channels into containers. A seam so tests can inject a
/// scripted shell.
pub trait ShellFactory: Send + Sync {
    fn open(&self, node_name: &str, vmid: u32) -> Arc<dyn ContainerShell>;
}

/// Production factory: tunnel through the PVE host's container-exec facility
pub struct PctShellFactory {
    pve_host: String,
}

impl PctShellFactory {
    pub fn new(pve_host: impl Into<String>) -> Self {
        Self {
            pve_host: pve_host.into(),
        }
    }
}

impl ShellFactory for PctShellFactory {
    fn open(&self, _node_name: &str, vmid: u32) -> Arc<dyn ContainerShell> {
        Arc::new(SshShell::pct(&self.pve_host, vmid))
    }
}

/// Structured result of one provisioning job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub container_id: String,
    pub success: bool,
    pub message: String,
}

/// Drives containers through the five-phase pipeline
pub struct Provisioner {
    pve: Arc<dyn PveClient>,
    store: ContainerStore,
    bus: Arc<dyn EventBus>,
    shells: Arc<dyn ShellFactory>,
    secrets: SecretBox,
    timeouts: Timeouts,
    config_repo: Option<haus_config::ConfigRepo>,
}

impl Provisioner {
    pub fn new(
        pve: Arc<dyn PveClient>,
        store: ContainerStore,
        bus: Arc<dyn EventBus>,
        shells: Arc<dyn ShellFactory>,
        secrets: SecretBox,
        timeouts: Timeouts,
        config_repo: Option<haus_config::ConfigRepo>,
    ) -> Self {
        Self {
            pve,
            store,
            bus,
            shells,
            secrets,
            timeouts,
            config_repo,
        }
    }

    /// Fail a job before intake without touching its lifecycle (used for
    /// configuration errors like an unresolvable template)
    pub async fn reject_job(&self, job: &ContainerCreationJob, reason: &str) -> JobOutcome {
        let reporter = self.reporter(&job.container_id);
        let _ = reporter.error(reason).await;
        JobOutcome {
            container_id: job.container_id.clone(),
            success: false,
            message: reason.to_string(),
        }
    }

    fn reporter(&self, container_id: &str) -> ProgressReporter {
        ProgressReporter::new(container_id, self.bus.clone(), self.store.clone())
    }

    /// Run one provisioning job to completion or failure
    pub async fn run_job(
        &self,
        job: &ContainerCreationJob,
        template: Option<&Template>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let reporter = self.reporter(&job.container_id);

        // Intake: payload and template validation, record creation. Failures
        // here never transition the lifecycle past pending.
        if let Err(e) = self.intake(job, template) {
            let message = e.user_message();
            tracing::warn!("job {} rejected at intake: {}", job.container_id, e);
            let _ = reporter.error(&message).await;
            return JobOutcome {
                container_id: job.container_id.clone(),
                success: false,
                message,
            };
        }

        let mut shell: Option<Arc<dyn ContainerShell>> = None;
        let result = self
            .execute(job, template, cancel, &reporter, &mut shell)
            .await;

        // The shell channel is closed on every exit path
        if let Some(shell) = shell {
            shell.close().await;
        }

        match result {
            Ok(()) => JobOutcome {
                container_id: job.container_id.clone(),
                success: true,
                message: "ready".to_string(),
            },
            Err(e) => {
                let message = e.user_message();
                tracing::error!("provisioning {} failed: {}", job.container_id, e);
                if let Err(te) = self.store.transition(&job.container_id, Lifecycle::Error) {
                    tracing::warn!("cannot mark {} as error: {}", job.container_id, te);
                }
                let _ = reporter.error(&message).await;
                JobOutcome {
                    container_id: job.container_id.clone(),
                    success: false,
                    message,
                }
            }
        }
    }

    fn intake(&self, job: &ContainerCreationJob, template: Option<&Template>) -> Result<()> {
        job.validate()?;
        if let Some(template) = template {
            template.validate()?;
        }
        if job.template_id.is_some() && template.is_none() {
            return Err(CoreError::Validation(format!(
                "template {:?} not found",
                job.template_id.as_deref().unwrap_or_default()
            )));
        }

        match self.store.get_container(&job.container_id)? {
            Some(record) if record.lifecycle == Lifecycle::Pending => Ok(()),
            Some(record) => Err(CoreError::Validation(format!(
                "container is {}, expected pending",
                record.lifecycle
            ))),
            None => {
                let mut record =
                    ContainerRecord::new(&job.container_id, job.config.vmid, &job.node_name);
                record.template_id = job.template_id.clone();
                record.root_password_encrypted =
                    Some(self.secrets.seal(job.config.root_password.as_bytes())?);
                self.store.insert_container(&record)?;
                Ok(())
            }
        }
    }

    async fn execute(
        &self,
        job: &ContainerCreationJob,
        template: Option<&Template>,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
        shell_slot: &mut Option<Arc<dyn ContainerShell>>,
    ) -> Result<()> {
        self.check_cancel(cancel)?;
        self.create_phase(job, template, reporter).await?;

        self.check_cancel(cancel)?;
        let shell = self.start_phase(job, reporter).await?;
        *shell_slot = Some(shell.clone());

        self.check_cancel(cancel)?;
        self.deploy_phase(job, template, shell.as_ref(), reporter)
            .await?;

        self.check_cancel(cancel)?;
        self.sync_phase(job, template, shell.as_ref(), cancel, reporter)
            .await?;

        self.check_cancel(cancel)?;
        self.finalize_phase(job, shell.as_ref(), reporter).await?;

        Ok(())
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a remote command that must succeed; non-zero exit is fatal
    pub(crate) async fn run_ok(
        &self,
        shell: &dyn ContainerShell,
        script: &str,
    ) -> Result<String> {
        let out = shell.run(&ShellCommand::script(script)).await?;
        if !out.success() {
            return Err(CoreError::RemoteExec(format!(
                "{:?} exited {}: {}",
                script,
                out.exit_code,
                out.output.trim()
            )));
        }
        Ok(out.output)
    }
}

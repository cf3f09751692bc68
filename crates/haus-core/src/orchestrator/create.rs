//! P1 create and P2 start

use super::Provisioner;
use crate::{CoreError, Lifecycle, PipelineStep, ProgressReporter, Result};
use haus_config::{ContainerCreationJob, Template};
use haus_pve::{ContainerShell, CreateCtRequest, ShellCommand};
use std::sync::Arc;
use std::time::Duration;

/// Directory probed to decide the container filesystem is ready
const FS_READY_PROBE_DIR: &str = "/etc/systemd/system";

impl Provisioner {
    /// P1 (0–20%): create the LXC via PVE and poll the task
    pub(crate) async fn create_phase(
        &self,
        job: &ContainerCreationJob,
        template: Option<&Template>,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        self.store
            .transition(&job.container_id, Lifecycle::Creating)?;
        reporter
            .step(PipelineStep::Creating, 0, "Creating container")
            .await?;

        let request = creation_request(job, template);
        let upid = self.pve.create_ct(&job.node_name, &request).await?;
        tracing::info!("create task {} for vmid {}", upid, job.config.vmid);
        self.pve
            .wait_task(
                &job.node_name,
                &upid,
                self.timeouts.create,
                self.timeouts.task_poll_interval,
            )
            .await?;

        reporter
            .step(PipelineStep::Creating, 20, "Container created")
            .await?;
        Ok(())
    }

    /// P2 (20–35%): start the container, wait for the task, then probe for
    /// filesystem readiness through the shell channel
    pub(crate) async fn start_phase(
        &self,
        job: &ContainerCreationJob,
        reporter: &ProgressReporter,
    ) -> Result<Arc<dyn ContainerShell>> {
        self.store
            .transition(&job.container_id, Lifecycle::Starting)?;
        reporter
            .step(PipelineStep::Starting, 20, "Starting container")
            .await?;

        let upid = self.pve.start_ct(&job.node_name, job.config.vmid).await?;
        self.pve
            .wait_task(
                &job.node_name,
                &upid,
                self.timeouts.start,
                self.timeouts.task_poll_interval,
            )
            .await?;

        let shell = self.shells.open(&job.node_name, job.config.vmid);
        self.wait_fs_ready(shell.as_ref()).await?;

        reporter
            .step(PipelineStep::Starting, 35, "Container started")
            .await?;
        Ok(shell)
    }

    /// Probe a known directory until the container filesystem responds
    async fn wait_fs_ready(&self, shell: &dyn ContainerShell) -> Result<()> {
        let probes = self.timeouts.fs_ready_probes.max(1);
        for attempt in 1..=probes {
            let probe = shell
                .run(&ShellCommand::script(format!(
                    "test -d {}",
                    FS_READY_PROBE_DIR
                )))
                .await;
            match probe {
                Ok(out) if out.success() => return Ok(()),
                Ok(_) => {}
                Err(e) => tracing::debug!("fs-ready probe {} failed: {}", attempt, e),
            }
            if attempt < probes {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Err(CoreError::RemoteExec(format!(
            "container filesystem not ready after {} probes",
            probes
        )))
    }
}

/// Assemble the fully-specified creation request. The payload carries the
/// wizard-resolved sizing and the unprivileged/nesting flags; keyctl and
/// fuse come from the template's security flags.
fn creation_request(job: &ContainerCreationJob, template: Option<&Template>) -> CreateCtRequest {
    let config = &job.config;
    let flags = template.map(|t| t.security_flags).unwrap_or_default();
    CreateCtRequest {
        vmid: config.vmid,
        ostemplate: config.ostemplate.clone(),
        hostname: config.hostname.clone(),
        memory_mb: config.memory_mb,
        swap_mb: config.swap_mb,
        cores: config.cores,
        storage: config.storage.clone(),
        disk_gb: config.disk_gb,
        bridge: config.bridge.clone(),
        ip_config: config.ip_config.clone(),
        nameserver: config.nameserver.clone(),
        root_password: config.root_password.clone(),
        ssh_public_key: config.ssh_public_key.clone(),
        unprivileged: config.unprivileged,
        nesting: config.nesting,
        keyctl: flags.keyctl,
        fuse: flags.fuse,
        tags: config.tags.clone(),
    }
}

//! P5 finalize: credentials, service discovery, terminal state

use super::Provisioner;
use crate::{
    parse_listen_ports, parse_running_units, service_name_from_credential_file, Lifecycle,
    PipelineStep, ProgressReporter, Result, ServiceRecord,
};
use haus_config::ContainerCreationJob;
use haus_pve::ContainerShell;

/// Credential drop directory inside the container
const CREDENTIALS_DIR: &str = "/etc/infrahaus/credentials";

impl Provisioner {
    /// P5 (90–100%): record credentials, discover services and ports,
    /// transition to ready
    pub(crate) async fn finalize_phase(
        &self,
        job: &ContainerCreationJob,
        shell: &dyn ContainerShell,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        self.store
            .transition(&job.container_id, Lifecycle::Finalizing)?;
        reporter
            .step(PipelineStep::Finalizing, 90, "Discovering services")
            .await?;

        self.record_credentials(job, shell).await?;
        self.discover_services(job, shell).await?;

        self.store.transition(&job.container_id, Lifecycle::Ready)?;
        reporter.complete("Container ready").await?;
        Ok(())
    }

    /// Read each non-empty credential drop file, encrypt its contents, and
    /// record a service row for it
    async fn record_credentials(
        &self,
        job: &ContainerCreationJob,
        shell: &dyn ContainerShell,
    ) -> Result<()> {
        for file in shell.list_dir(CREDENTIALS_DIR).await? {
            let path = format!("{}/{}", CREDENTIALS_DIR, file);
            let contents = match shell.read_file(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!("cannot read credential file {}: {}", path, e);
                    continue;
                }
            };
            if contents.is_empty() {
                continue;
            }

            let sealed = self.secrets.seal(&contents)?;
            self.store.upsert_service(&ServiceRecord {
                container_id: job.container_id.clone(),
                name: service_name_from_credential_file(&file),
                service_type: "systemd".to_string(),
                port: None,
                web_url: None,
                status: "running".to_string(),
                credentials_encrypted: Some(sealed),
            })?;
        }
        Ok(())
    }

    /// Enumerate running units and listening ports, then upsert one service
    /// record per discovered service
    async fn discover_services(
        &self,
        job: &ContainerCreationJob,
        shell: &dyn ContainerShell,
    ) -> Result<()> {
        let units_output = self
            .run_ok(
                shell,
                "systemctl list-units --type=service --state=running --no-legend --plain",
            )
            .await?;
        let units = parse_running_units(&units_output);

        let ports = match self.run_ok(shell, "ss -tlnp").await {
            Ok(output) => parse_listen_ports(&output),
            Err(e) => {
                tracing::warn!("port discovery failed: {}", e);
                Default::default()
            }
        };

        let container_ip = match self.run_ok(shell, "hostname -I | awk '{print $1}'").await {
            Ok(output) => {
                let ip = output.trim().to_string();
                (!ip.is_empty()).then_some(ip)
            }
            Err(_) => None,
        };

        for unit in units {
            let port = ports.get(&unit).copied();
            let web_url = match (port, &container_ip) {
                (Some(port), Some(ip)) => Some(format!("http://{}:{}", ip, port)),
                _ => None,
            };
            self.store.upsert_service(&ServiceRecord {
                container_id: job.container_id.clone(),
                name: unit.clone(),
                service_type: "systemd".to_string(),
                port,
                web_url,
                status: "running".to_string(),
                credentials_encrypted: None,
            })?;
        }
        Ok(())
    }
}

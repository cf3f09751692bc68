//! P3 deploy: agent assets and template files into the container

use super::Provisioner;
use crate::{
    agent_unit, config_env, sync_driver_script, Lifecycle, PipelineStep, ProgressReporter,
    Result, AGENT_UNIT_PATH, CONFIG_ENV_PATH, REMOTE_DIRS, SYNC_DRIVER_PATH,
};
use haus_config::{substitute_user, ContainerCreationJob, Template};
use haus_pve::ContainerShell;

impl Provisioner {
    /// P3 (35–60%): directories, config.env, sync driver + unit, managed
    /// files. Infrastructure command failures here are fatal.
    pub(crate) async fn deploy_phase(
        &self,
        job: &ContainerCreationJob,
        template: Option<&Template>,
        shell: &dyn ContainerShell,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        self.store
            .transition(&job.container_id, Lifecycle::Deploying)?;
        reporter
            .step(PipelineStep::Deploying, 35, "Deploying configuration manager")
            .await?;

        for dir in REMOTE_DIRS {
            self.run_ok(shell, &format!("mkdir -p {}", dir)).await?;
        }

        let template_name = template.map(|t| t.name.as_str()).unwrap_or("none");
        shell
            .write_file(
                CONFIG_ENV_PATH,
                config_env(self.config_repo.as_ref(), template_name, &job.container_id)
                    .as_bytes(),
                "0644",
            )
            .await?;
        shell
            .write_file(SYNC_DRIVER_PATH, sync_driver_script().as_bytes(), "0755")
            .await?;
        shell
            .write_file(AGENT_UNIT_PATH, agent_unit().as_bytes(), "0644")
            .await?;

        self.run_ok(shell, "systemctl daemon-reload").await?;
        self.run_ok(shell, "systemctl enable haus-agent.service")
            .await?;

        if let Some(template) = template {
            reporter
                .step(
                    PipelineStep::Deploying,
                    50,
                    format!("Uploading {} template file(s)", template.files.len()),
                )
                .await?;
            for file in &template.files {
                let target_dir = substitute_user(&file.target_path, "root");
                let target = format!("{}/{}", target_dir.trim_end_matches('/'), file.name);
                shell
                    .write_file(&target, file.content.as_bytes(), "0644")
                    .await?;
                reporter.log(format!("uploaded {}", target)).await;
            }
        }

        reporter
            .step(PipelineStep::Deploying, 60, "Deployment complete")
            .await?;
        Ok(())
    }
}

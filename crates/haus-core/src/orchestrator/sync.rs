//! P4 sync: initial agent run, user-selected packages, user-subset scripts

use super::Provisioner;
use crate::{CoreError, Lifecycle, PipelineStep, ProgressReporter, Result};
use haus_config::{
    is_valid_package_name, ContainerCreationJob, Script, Template,
};
use haus_pve::{ContainerShell, ShellCommand};
use tokio_util::sync::CancellationToken;

impl Provisioner {
    /// P4 (60–90%): initial sync and user packages are best-effort; a
    /// failing user script fails the whole pipeline.
    pub(crate) async fn sync_phase(
        &self,
        job: &ContainerCreationJob,
        template: Option<&Template>,
        shell: &dyn ContainerShell,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        self.store
            .transition(&job.container_id, Lifecycle::Syncing)?;
        reporter
            .step(PipelineStep::Syncing, 60, "Running initial sync")
            .await?;

        self.initial_sync(shell, reporter).await;
        self.install_user_packages(job, template, shell, reporter)
            .await;

        reporter
            .step(PipelineStep::Syncing, 65, "Running setup scripts")
            .await?;
        self.run_user_scripts(job, template, shell, cancel, reporter)
            .await?;

        Ok(())
    }

    /// Start the agent unit once and surface its log output. Best-effort:
    /// a failed initial sync is logged and the pipeline continues.
    async fn initial_sync(&self, shell: &dyn ContainerShell, reporter: &ProgressReporter) {
        let start = self
            .stream_to_log(shell, "systemctl start haus-agent.service", reporter)
            .await;
        match start {
            Ok(0) => {}
            Ok(code) => {
                tracing::warn!("initial sync exited {}", code);
                reporter
                    .log(format!("initial sync failed with exit code {} (continuing)", code))
                    .await;
            }
            Err(e) => {
                tracing::warn!("initial sync failed: {}", e);
                reporter.log("initial sync failed (continuing)").await;
            }
        }

        // Surface the agent's journal for the dashboard log stream
        let _ = self
            .stream_to_log(
                shell,
                "journalctl -u haus-agent.service --no-pager -n 100",
                reporter,
            )
            .await;
    }

    /// Install wizard-selected packages with the container's native manager.
    /// Failures are warnings.
    async fn install_user_packages(
        &self,
        job: &ContainerCreationJob,
        template: Option<&Template>,
        shell: &dyn ContainerShell,
        reporter: &ProgressReporter,
    ) {
        let mut names: Vec<String> = Vec::new();

        if let Some(template) = template {
            for package in &template.packages {
                if job
                    .enabled_buckets
                    .iter()
                    .any(|bucket| bucket == &package.manager.to_string())
                {
                    names.push(package.name.clone());
                }
            }
        }
        for extra in &job.additional_packages {
            if is_valid_package_name(extra) {
                names.push(extra.clone());
            } else {
                tracing::warn!("Skipping invalid package name: {:?}", extra);
            }
        }
        names.dedup();
        if names.is_empty() {
            return;
        }

        let script = format!(
            "if command -v apt-get >/dev/null; then DEBIAN_FRONTEND=noninteractive apt-get install -y {names}; \
             elif command -v apk >/dev/null; then apk add {names}; \
             elif command -v dnf >/dev/null; then dnf install -y {names}; \
             elif command -v yum >/dev/null; then yum install -y {names}; \
             else echo 'no package manager found' >&2; exit 1; fi",
            names = names.join(" ")
        );

        match self.stream_to_log(shell, &script, reporter).await {
            Ok(0) => {}
            Ok(code) => {
                tracing::warn!("user package install exited {}", code);
                reporter
                    .log(format!("package install failed with exit code {} (continuing)", code))
                    .await;
            }
            Err(e) => tracing::warn!("user package install failed: {}", e),
        }
    }

    /// Run the user-selected subset of template scripts in order, streaming
    /// output and apportioning percent uniformly into 65..90. The first
    /// non-zero exit aborts the rest and fails the pipeline.
    async fn run_user_scripts(
        &self,
        job: &ContainerCreationJob,
        template: Option<&Template>,
        shell: &dyn ContainerShell,
        cancel: &CancellationToken,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        let scripts = selected_scripts(job, template);
        let count = scripts.len();
        if count == 0 {
            return Ok(());
        }

        self.run_ok(shell, "mkdir -p /tmp/haus-scripts").await?;

        for (index, script) in scripts.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let file_name = script.file_name();
            let remote_path = format!("/tmp/haus-scripts/{}", file_name);
            shell
                .write_file(&remote_path, script.content.as_bytes(), "0755")
                .await?;

            reporter.log(format!("running {}", file_name)).await;
            let exit_code = self
                .stream_to_log(shell, &format!("sh {}", remote_path), reporter)
                .await?;
            if exit_code != 0 {
                return Err(CoreError::ScriptFailed {
                    name: file_name,
                    code: exit_code,
                });
            }

            let percent = 65 + (((index + 1) * 25) / count) as u8;
            reporter
                .step(
                    PipelineStep::Syncing,
                    percent.min(90),
                    format!("Script {} completed", file_name),
                )
                .await?;
        }

        Ok(())
    }

    /// Stream a remote command's output lines into the progress log. The
    /// channel is fully drained before this returns, so the output of one
    /// script is flushed before the next starts.
    pub(crate) async fn stream_to_log(
        &self,
        shell: &dyn ContainerShell,
        script: &str,
        reporter: &ProgressReporter,
    ) -> Result<i64> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
        let command = ShellCommand::script(script);

        let (exit, ()) = tokio::join!(shell.run_streamed(&command, tx), async {
            while let Some(line) = rx.recv().await {
                reporter.log(line).await;
            }
        });

        Ok(exit?)
    }
}

/// Resolve the job's script selection against the template.
///
/// Wizard selections override the template's enabled flags; with no
/// selection, the template's enabled scripts run as-is. Order is ascending
/// `(order, name)` either way.
fn selected_scripts(job: &ContainerCreationJob, template: Option<&Template>) -> Vec<Script> {
    let template = match template {
        Some(template) => template,
        None => return Vec::new(),
    };

    if job.scripts.is_empty() {
        return template.ordered_scripts().into_iter().cloned().collect();
    }

    let mut scripts: Vec<Script> = Vec::new();
    for selection in job.selected_scripts() {
        if let Some(script) = template.scripts.iter().find(|s| s.name == selection.name) {
            scripts.push(script.clone());
        } else {
            tracing::warn!("selected script {:?} not in template", selection.name);
        }
    }
    scripts.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    scripts
}

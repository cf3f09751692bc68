//! The provisioning worker
//!
//! A single queue consumer with bounded job concurrency (default 2). Each
//! job gets its own cancellation token, a child of the worker's shutdown
//! token.

use crate::{JobQueue, JobOutcome, Provisioner, TemplateCatalog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// How long a queue pop blocks before re-checking shutdown
const POP_INTERVAL: Duration = Duration::from_secs(5);

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    catalog: Arc<dyn TemplateCatalog>,
    provisioner: Arc<Provisioner>,
    concurrency: usize,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        catalog: Arc<dyn TemplateCatalog>,
        provisioner: Arc<Provisioner>,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            catalog,
            provisioner,
            concurrency: concurrency.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the consume loop and cancels in-flight jobs
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Consume jobs until shutdown. In-flight jobs are awaited via their
    /// permits before this returns.
    pub async fn run(&self) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            // Respect the concurrency bound before taking a job off the
            // durable queue
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let job = tokio::select! {
                job = self.queue.pop(POP_INTERVAL) => job,
                _ = self.shutdown.cancelled() => break,
            };

            let job = match job {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("queue pop failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let provisioner = self.provisioner.clone();
            let catalog = self.catalog.clone();
            let cancel = self.shutdown.child_token();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = run_one(provisioner.as_ref(), catalog.as_ref(), job, cancel).await;
                if outcome.success {
                    tracing::info!("container {} ready", outcome.container_id);
                } else {
                    tracing::warn!(
                        "container {} failed: {}",
                        outcome.container_id,
                        outcome.message
                    );
                }
            });
        }

        // Drain: wait for all permits, i.e. all in-flight jobs
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
    }
}

/// Resolve the template and run one job
async fn run_one(
    provisioner: &Provisioner,
    catalog: &dyn TemplateCatalog,
    job: haus_config::ContainerCreationJob,
    cancel: CancellationToken,
) -> JobOutcome {
    let template = match &job.template_id {
        Some(template_id) => match catalog.get(template_id).await {
            Ok(template) => template,
            Err(e) => {
                return provisioner
                    .reject_job(&job, &format!("Invalid configuration: {}", e))
                    .await;
            }
        },
        None => None,
    };

    provisioner.run_job(&job, template.as_ref(), &cancel).await
}

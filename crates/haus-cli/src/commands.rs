//! Command implementations

use anyhow::Context;
use haus_config::{ContainerCreationJob, ProcessConfig};
use haus_core::{
    ContainerStore, JobQueue, JsonCatalog, PctShellFactory, Provisioner, RedisBus, RedisQueue,
    SecretBox, Worker,
};
use std::path::Path;
use std::sync::Arc;

/// Run the provisioning worker until interrupted
pub async fn worker(db: &Path, templates: &Path) -> anyhow::Result<()> {
    let config = ProcessConfig::from_env().context("invalid environment")?;

    let store = ContainerStore::open(db)?;
    let queue = Arc::new(RedisQueue::connect(&config.redis_url).await?);
    let bus = Arc::new(RedisBus::connect(&config.redis_url).await?);
    let pve = haus_pve::connect(&config.pve)
        .await
        .context("cannot connect to PVE")?;

    let provisioner = Provisioner::new(
        Arc::from(pve),
        store,
        bus,
        Arc::new(PctShellFactory::new(&config.pve.host)),
        SecretBox::new(&config.secret_key),
        config.timeouts.clone(),
        config.config_repo.clone(),
    );

    let worker = Worker::new(
        queue,
        Arc::new(JsonCatalog::new(templates)),
        Arc::new(provisioner),
        config.worker_concurrency,
    );

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    });

    tracing::info!(
        "worker started (concurrency {})",
        config.worker_concurrency
    );
    worker.run().await;
    Ok(())
}

/// Validate a job payload and push it onto the queue
pub async fn enqueue(job_path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(job_path)
        .with_context(|| format!("cannot read {}", job_path.display()))?;
    let job: ContainerCreationJob = serde_json::from_str(&content).context("invalid job JSON")?;
    job.validate().context("invalid job payload")?;

    let config = ProcessConfig::from_env().context("invalid environment")?;
    let queue = RedisQueue::connect(&config.redis_url).await?;
    queue.push(&job).await?;

    println!(
        "enqueued job for container {} (vmid {})",
        job.container_id, job.config.vmid
    );
    Ok(())
}

/// Print container records
pub fn containers(db: &Path) -> anyhow::Result<()> {
    let store = ContainerStore::open(db)?;
    let records = store.list_containers()?;
    if records.is_empty() {
        println!("no containers");
        return Ok(());
    }
    for record in records {
        println!(
            "{:<36} vmid={:<6} node={:<10} {:<10} created {}",
            record.id,
            record.vmid,
            record.node_name,
            record.lifecycle,
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Reset an errored container to pending
pub fn reset(db: &Path, container_id: &str) -> anyhow::Result<()> {
    let store = ContainerStore::open(db)?;
    store.reset(container_id)?;
    println!("container {} reset to pending", container_id);
    Ok(())
}

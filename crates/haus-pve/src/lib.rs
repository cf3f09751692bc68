//! PVE client trait and implementations for infrahaus
//!
//! This crate provides the interface the orchestrator consumes for container
//! lifecycle on a Proxmox VE host (create / start / task polling) and the
//! shell channel used to run commands inside a container.

mod error;
mod http;
mod shell;
mod types;

pub use error::*;
pub use http::PveApiClient;
pub use shell::*;
pub use types::*;

use async_trait::async_trait;
use std::time::Duration;

/// Trait for PVE lifecycle operations the orchestrator depends on
#[async_trait]
pub trait PveClient: Send + Sync {
    /// Create an LXC container. Returns the UPID of the asynchronous task.
    async fn create_ct(&self, node: &str, req: &CreateCtRequest) -> Result<Upid>;

    /// Start a container. Returns the UPID of the asynchronous task.
    async fn start_ct(&self, node: &str, vmid: u32) -> Result<Upid>;

    /// Query the status of an asynchronous task.
    async fn task_status(&self, node: &str, upid: &Upid) -> Result<TaskStatus>;

    /// Check if the API is reachable and authenticated.
    async fn ping(&self) -> Result<()>;

    /// Poll a task until it finishes, with a hard deadline.
    ///
    /// Returns `TaskTimeout` when the deadline passes while the task is still
    /// running, and `TaskFailed` when the task stops with a non-OK exit status.
    async fn wait_task(
        &self,
        node: &str,
        upid: &Upid,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.task_status(node, upid).await?;
            if !status.running {
                return if status.ok() {
                    Ok(())
                } else {
                    Err(PveError::TaskFailed {
                        upid: upid.to_string(),
                        exit_status: status.exit_status.unwrap_or_else(|| "unknown".to_string()),
                    })
                };
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PveError::TaskTimeout(upid.to_string()));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Create the API client from process configuration
pub async fn connect(config: &haus_config::PveConfig) -> Result<Box<dyn PveClient>> {
    let client = PveApiClient::connect(config).await?;
    Ok(Box::new(client))
}

//! Durable provisioning job queue
//!
//! Jobs are JSON blobs on a Redis list; `BRPOP` gives blocking handoff with
//! at-least-once semantics. An in-memory queue backs the test suite.

use crate::Result;
use async_trait::async_trait;
use haus_config::ContainerCreationJob;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Queue key for provisioning jobs
pub const JOB_QUEUE_KEY: &str = "jobs:provision";

/// Trait for the provisioning job queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job
    async fn push(&self, job: &ContainerCreationJob) -> Result<()>;

    /// Block up to `timeout` for the next job; `None` on timeout
    async fn pop(&self, timeout: Duration) -> Result<Option<ContainerCreationJob>>;
}

/// Redis-backed durable queue
pub struct RedisQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: JOB_QUEUE_KEY.to_string(),
        })
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn push(&self, job: &ContainerCreationJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.key, payload).await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<ContainerCreationJob>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> =
            conn.brpop(&self.key, timeout.as_secs_f64()).await?;
        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

/// In-memory queue for tests and embedded single-process use
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<ContainerCreationJob>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, job: &ContainerCreationJob) -> Result<()> {
        self.jobs.lock().unwrap().push_back(job.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<ContainerCreationJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.jobs.lock().unwrap().pop_front() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> ContainerCreationJob {
        serde_json::from_value(serde_json::json!({
            "containerId": id,
            "nodeName": "pve1",
            "config": {
                "hostname": "h",
                "vmid": 120,
                "memoryMb": 1024,
                "swapMb": 0,
                "cores": 1,
                "diskGb": 8,
                "storage": "local-lvm",
                "bridge": "vmbr0",
                "ipConfig": "ip=dhcp",
                "rootPassword": "pw",
                "unprivileged": true,
                "nesting": false,
                "ostemplate": "local:vztmpl/x.tar.zst"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_queue_fifo() {
        let queue = MemoryQueue::new();
        queue.push(&job("a")).await.unwrap();
        queue.push(&job("b")).await.unwrap();

        let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.container_id, "a");
        let second = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.container_id, "b");
    }

    #[tokio::test]
    async fn test_memory_queue_pop_times_out() {
        let queue = MemoryQueue::new();
        let popped = queue.pop(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_memory_queue_wakes_blocked_pop() {
        let queue = std::sync::Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(&job("late")).await.unwrap();

        let popped = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(popped.container_id, "late");
    }
}

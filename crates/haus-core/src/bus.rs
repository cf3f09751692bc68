//! Progress event bus
//!
//! Events publish on a per-container channel (`progress:<containerId>`).
//! Publishing never blocks the worker on slow subscribers.

use crate::{progress_channel, ProgressEvent, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;

/// Trait for publishing progress events
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &ProgressEvent) -> Result<()>;
}

/// Redis pub/sub bus
pub struct RedisBus {
    conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        let channel = progress_channel(&event.container_id);
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }
}

/// In-process bus backed by a broadcast channel. Used by the test suite and
/// by embedded single-process deployments.
pub struct MemoryBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl MemoryBus {
    pub fn new() -> Self {
        // Slow subscribers lag and lose old events rather than stalling
        // the publisher
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        // No subscribers is fine; events are fire-and-forget
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineStep;

    #[tokio::test]
    async fn test_memory_bus_delivers_in_order() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe();

        bus.publish(&ProgressEvent::step("c-1", PipelineStep::Creating, 0, "a"))
            .await
            .unwrap();
        bus.publish(&ProgressEvent::step("c-1", PipelineStep::Creating, 20, "b"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().percent, Some(0));
        assert_eq!(rx.recv().await.unwrap().percent, Some(20));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        bus.publish(&ProgressEvent::log("c-1", "line"))
            .await
            .unwrap();
    }
}

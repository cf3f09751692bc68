//! Progress reporting for one provisioning job
//!
//! The reporter owns the monotonic-percent invariant: a percent lower than
//! one already published is clamped up. `step`, `complete`, and `error`
//! events persist to the store before they publish, so durable state never
//! lags emitted progress. `log` events are transient.

use crate::{ContainerStore, EventBus, PipelineStep, ProgressEvent, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub struct ProgressReporter {
    container_id: String,
    bus: Arc<dyn EventBus>,
    store: ContainerStore,
    last_percent: AtomicU8,
}

impl ProgressReporter {
    pub fn new(container_id: impl Into<String>, bus: Arc<dyn EventBus>, store: ContainerStore) -> Self {
        Self {
            container_id: container_id.into(),
            bus,
            store,
            last_percent: AtomicU8::new(0),
        }
    }

    fn clamp(&self, percent: u8) -> u8 {
        let last = self.last_percent.load(Ordering::SeqCst);
        let percent = percent.max(last).min(100);
        self.last_percent.store(percent, Ordering::SeqCst);
        percent
    }

    /// Publish a step event with a monotonic percent
    pub async fn step(&self, step: PipelineStep, percent: u8, message: impl Into<String>) -> Result<()> {
        let event = ProgressEvent::step(&self.container_id, step, self.clamp(percent), message);
        self.store.record_event(&event)?;
        self.bus.publish(&event).await
    }

    /// Publish a transient log line. Never fails the pipeline: a slow or
    /// broken subscriber drops lines.
    pub async fn log(&self, message: impl Into<String>) {
        let event = ProgressEvent::log(&self.container_id, message);
        if let Err(e) = self.bus.publish(&event).await {
            tracing::debug!("dropping log event: {}", e);
        }
    }

    /// Publish the terminal complete event at 100%
    pub async fn complete(&self, message: impl Into<String>) -> Result<()> {
        self.clamp(100);
        let event = ProgressEvent::complete(&self.container_id, message);
        self.store.record_event(&event)?;
        self.bus.publish(&event).await
    }

    /// Publish the terminal error event
    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        let event = ProgressEvent::error(&self.container_id, message);
        self.store.record_event(&event)?;
        self.bus.publish(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContainerRecord, MemoryBus};

    fn reporter_with_bus() -> (ProgressReporter, tokio::sync::broadcast::Receiver<ProgressEvent>, ContainerStore) {
        let store = ContainerStore::open_in_memory().unwrap();
        store
            .insert_container(&ContainerRecord::new("c-1", 120, "pve1"))
            .unwrap();
        let bus = Arc::new(MemoryBus::new());
        let rx = bus.subscribe();
        let reporter = ProgressReporter::new("c-1", bus, store.clone());
        (reporter, rx, store)
    }

    #[tokio::test]
    async fn test_percent_is_monotonic() {
        let (reporter, mut rx, _store) = reporter_with_bus();

        reporter.step(PipelineStep::Creating, 20, "a").await.unwrap();
        // A lower percent clamps up to the last published value
        reporter.step(PipelineStep::Starting, 10, "b").await.unwrap();
        reporter.step(PipelineStep::Deploying, 60, "c").await.unwrap();

        let percents: Vec<u8> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.percent.unwrap())
        .collect();
        assert_eq!(percents, vec![20, 20, 60]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_step_persists_before_publish() {
        let (reporter, _rx, store) = reporter_with_bus();
        reporter.step(PipelineStep::Creating, 5, "x").await.unwrap();

        let events = store.events_for("c-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, Some(5));
    }

    #[tokio::test]
    async fn test_log_events_not_persisted() {
        let (reporter, mut rx, store) = reporter_with_bus();
        reporter.log("a line").await;

        assert!(store.events_for("c-1").unwrap().is_empty());
        // Still published to subscribers
        assert_eq!(rx.recv().await.unwrap().message, "a line");
    }

    #[tokio::test]
    async fn test_complete_is_100() {
        let (reporter, mut rx, store) = reporter_with_bus();
        reporter.step(PipelineStep::Finalizing, 90, "x").await.unwrap();
        reporter.complete("done").await.unwrap();

        let _ = rx.recv().await.unwrap();
        let complete = rx.recv().await.unwrap();
        assert_eq!(complete.percent, Some(100));
        assert_eq!(store.events_for("c-1").unwrap().len(), 2);
    }
}

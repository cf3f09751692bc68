//! Worker loop tests against the in-memory queue

use haus_config::Timeouts;
use haus_core::test_support::{test_job, MockPve, MockShell, MockShellFactory};
use haus_core::{
    ContainerStore, JobQueue, Lifecycle, MemoryBus, MemoryQueue, Provisioner, SecretBox,
    StaticCatalog, Worker,
};
use std::sync::Arc;
use std::time::Duration;

fn build_worker(store: ContainerStore, queue: Arc<MemoryQueue>) -> Worker {
    let provisioner = Provisioner::new(
        Arc::new(MockPve::new()),
        store,
        Arc::new(MemoryBus::new()),
        Arc::new(MockShellFactory::new(Arc::new(MockShell::new()))),
        SecretBox::new(&[1u8; 32]),
        Timeouts::default(),
        None,
    );
    Worker::new(
        queue,
        Arc::new(StaticCatalog::new(Vec::new())),
        Arc::new(provisioner),
        2,
    )
}

async fn wait_for_lifecycle(store: &ContainerStore, id: &str, want: Lifecycle) {
    for _ in 0..200 {
        if let Some(record) = store.get_container(id).unwrap() {
            if record.lifecycle == want {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("container {} never reached {}", id, want);
}

#[tokio::test]
async fn worker_consumes_jobs_to_completion() {
    let store = ContainerStore::open_in_memory().unwrap();
    let queue = Arc::new(MemoryQueue::new());
    let worker = build_worker(store.clone(), queue.clone());
    let shutdown = worker.shutdown_token();

    queue.push(&test_job("c-1", None)).await.unwrap();
    queue.push(&test_job("c-2", None)).await.unwrap();

    let handle = tokio::spawn(async move { worker.run().await });

    wait_for_lifecycle(&store, "c-1", Lifecycle::Ready).await;
    wait_for_lifecycle(&store, "c-2", Lifecycle::Ready).await;
    assert!(queue.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn worker_shutdown_stops_consuming() {
    let store = ContainerStore::open_in_memory().unwrap();
    let queue = Arc::new(MemoryQueue::new());
    let worker = build_worker(store.clone(), queue.clone());
    let shutdown = worker.shutdown_token();

    let handle = tokio::spawn(async move { worker.run().await });
    shutdown.cancel();
    handle.await.unwrap();

    // Jobs pushed after shutdown stay queued
    queue.push(&test_job("c-9", None)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.len(), 1);
    assert!(store.get_container("c-9").unwrap().is_none());
}

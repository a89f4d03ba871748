//! At-least-once delivery integration tests
//!
//! Every pushed item reaches a handler, including across a process
//! "restart" simulated by reopening the disk backend in a fresh queue.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use forgeq_core::application::worker::{shutdown_channel, ShutdownSender, WorkerPoolQueue};
use forgeq_core::domain::{BackendKind, Payload, QueueSettings, QueueType};
use forgeq_core::factory::QueueFactory;
use forgeq_core::manager::Manager;
use forgeq_core::port::HandlerFn;
use forgeq_infra_disk::DiskProvider;

fn disk_factory() -> QueueFactory {
    let mut factory = QueueFactory::new();
    factory.register_provider(BackendKind::Disk, Arc::new(DiskProvider));
    factory
}

fn spawn_run<P: Payload>(queue: &Arc<WorkerPoolQueue<P>>) -> (ShutdownSender, ShutdownSender) {
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let (terminate_tx, terminate_rx) = shutdown_channel();
    let q = queue.clone();
    tokio::spawn(async move { q.run(shutdown_rx, terminate_rx).await });
    (shutdown_tx, terminate_tx)
}

#[tokio::test]
async fn test_thousand_items_all_delivered() {
    let factory = QueueFactory::new();
    let manager = Manager::new();

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let handler = {
        let seen = seen.clone();
        Arc::new(HandlerFn(move |batch: Vec<u64>| {
            let mut seen = seen.lock().unwrap();
            for item in batch {
                seen.insert(item);
            }
            Vec::new()
        }))
    };

    let settings = QueueSettings {
        workers: 4,
        max_workers: 4,
        length: 200,
        ..Default::default()
    };
    let (queue, _qid) = factory
        .create_queue::<u64>(&manager, "load", settings, handler, None)
        .await
        .unwrap();
    let _guards = spawn_run(&queue);

    for i in 0..1000u64 {
        queue.push(&i).await.unwrap();
    }
    queue.flush(Duration::from_secs(30)).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1000);
    for i in 0..1000u64 {
        assert!(seen.contains(&i), "item {i} was lost");
    }
}

#[tokio::test]
async fn test_disk_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let settings = QueueSettings {
        queue_type: QueueType::Disk,
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    // First process: enqueue work, handle nothing, "crash".
    {
        let factory = disk_factory();
        let manager = Manager::new();
        let handler = Arc::new(HandlerFn(|batch: Vec<String>| batch));
        let (queue, _qid) = factory
            .create_queue::<String>(&manager, "ci-dispatch", settings.clone(), handler, None)
            .await
            .unwrap();

        for i in 0..100 {
            queue.push(&format!("job-{i}")).await.unwrap();
        }
    }

    // Second process: same directory, everything is still there.
    let factory = disk_factory();
    let manager = Manager::new();
    let handled = Arc::new(AtomicUsize::new(0));
    let handler = {
        let handled = handled.clone();
        Arc::new(HandlerFn(move |batch: Vec<String>| {
            handled.fetch_add(batch.len(), Ordering::SeqCst);
            Vec::new()
        }))
    };
    let (queue, _qid) = factory
        .create_queue::<String>(&manager, "ci-dispatch", settings, handler, None)
        .await
        .unwrap();
    let _guards = spawn_run(&queue);

    queue.flush(Duration::from_secs(10)).await.unwrap();
    assert_eq!(handled.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn test_graceful_shutdown_leaves_no_items_behind_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let settings = QueueSettings {
        queue_type: QueueType::Disk,
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    let factory = disk_factory();
    let manager = Manager::new();
    let handled = Arc::new(AtomicUsize::new(0));
    let handler = {
        let handled = handled.clone();
        Arc::new(HandlerFn(move |batch: Vec<String>| {
            handled.fetch_add(batch.len(), Ordering::SeqCst);
            Vec::new()
        }))
    };
    let (queue, _qid) = factory
        .create_queue::<String>(&manager, "mail", settings, handler, None)
        .await
        .unwrap();
    let (shutdown_tx, _terminate_tx) = spawn_run(&queue);

    for i in 0..50 {
        queue.push(&format!("mail-{i}")).await.unwrap();
    }
    queue.flush(Duration::from_secs(10)).await.unwrap();
    shutdown_tx.shutdown();

    assert_eq!(handled.load(Ordering::SeqCst), 50);
}

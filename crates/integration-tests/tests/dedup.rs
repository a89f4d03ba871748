//! Deduplication integration tests
//!
//! Unique queues collapse equal payloads while they are enqueued, run push
//! callbacks only for newly added items, and free the key once the item is
//! popped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use forgeq_core::application::worker::{shutdown_channel, WorkerPoolQueue};
use forgeq_core::domain::{QueueSettings, QueueType};
use forgeq_core::factory::QueueFactory;
use forgeq_core::manager::Manager;
use forgeq_core::port::{DedupKeyFn, HandlerFn};
use forgeq_core::QueueError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CheckRun {
    commit: String,
    requested_at: u64,
}

fn unique_settings() -> QueueSettings {
    QueueSettings {
        queue_type: QueueType::UniqueChannel,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_duplicate_push_collapses() {
    let factory = QueueFactory::new();
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
        .create_queue::<String>(&manager, "pr-check", unique_settings(), handler, None)
        .await
        .unwrap();

    // Not running yet, so the first push stays enqueued.
    queue.push(&"sha-abc".to_string()).await.unwrap();
    let err = queue.push(&"sha-abc".to_string()).await.unwrap_err();
    assert!(matches!(err, QueueError::AlreadyInQueue));
    assert!(queue.has(&"sha-abc".to_string()).await.unwrap());

    // Process it; the key is freed and the same payload is accepted again.
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let (_terminate_tx, terminate_rx) = shutdown_channel();
    let q = queue.clone();
    tokio::spawn(async move { q.run(shutdown_rx, terminate_rx).await });

    queue.flush(Duration::from_secs(5)).await.unwrap();
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(!queue.has(&"sha-abc".to_string()).await.unwrap());

    queue.push(&"sha-abc".to_string()).await.unwrap();
    queue.flush(Duration::from_secs(5)).await.unwrap();
    assert_eq!(handled.load(Ordering::SeqCst), 2);
    shutdown_tx.shutdown();
}

#[tokio::test]
async fn test_push_callback_fires_once_per_new_entry() {
    let factory = QueueFactory::new();
    let manager = Manager::new();
    let handler = Arc::new(HandlerFn(|_: Vec<String>| Vec::new()));

    let (queue, _qid) = factory
        .create_queue::<String>(&manager, "pr-check", unique_settings(), handler, None)
        .await
        .unwrap();

    let callbacks = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let callbacks = callbacks.clone();
        let _ = queue
            .push_with_callback(
                &"sha-abc".to_string(),
                Box::pin(async move {
                    callbacks.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await;
    }

    // Two of the three pushes were duplicates; their callbacks never ran.
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_key_fn_ignores_incidental_fields() {
    let factory = QueueFactory::new();
    let manager = Manager::new();
    let handler = Arc::new(HandlerFn(|_: Vec<CheckRun>| Vec::new()));

    // Key on the commit only; the request timestamp is incidental.
    let key_fn: DedupKeyFn = Arc::new(|raw| {
        serde_json::from_slice::<CheckRun>(raw)
            .map(|run| run.commit.into_bytes())
            .unwrap_or_else(|_| raw.to_vec())
    });

    let (queue, _qid) = factory
        .create_queue::<CheckRun>(
            &manager,
            "pr-check",
            unique_settings(),
            handler,
            Some(key_fn),
        )
        .await
        .unwrap();

    queue
        .push(&CheckRun {
            commit: "sha-abc".into(),
            requested_at: 1000,
        })
        .await
        .unwrap();

    let err = queue
        .push(&CheckRun {
            commit: "sha-abc".into(),
            requested_at: 2000,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::AlreadyInQueue));

    queue
        .push(&CheckRun {
            commit: "sha-def".into(),
            requested_at: 2000,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_plain_queue_rejects_unique_operations() {
    let factory = QueueFactory::new();
    let manager = Manager::new();
    let handler = Arc::new(HandlerFn(|_: Vec<String>| Vec::new()));

    let (queue, _qid): (Arc<WorkerPoolQueue<String>>, u64) = factory
        .create_queue(&manager, "plain", QueueSettings::default(), handler, None)
        .await
        .unwrap();

    assert!(queue.has(&"x".to_string()).await.is_err());
}

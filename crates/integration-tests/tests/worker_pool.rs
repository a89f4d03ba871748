//! Worker pool control integration tests
//!
//! Cancelling a stuck worker frees its slot and requeues its batch;
//! add_workers takes effect on a running pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use forgeq_core::application::worker::{shutdown_channel, ShutdownSender, WorkerPoolQueue};
use forgeq_core::domain::QueueSettings;
use forgeq_core::factory::QueueFactory;
use forgeq_core::manager::{Manager, QueueControl};
use forgeq_core::port::BatchHandler;

/// Hangs on the first call, succeeds afterwards.
struct StuckOnce {
    calls: AtomicUsize,
    handled: AtomicUsize,
}

#[async_trait]
impl BatchHandler<String> for StuckOnce {
    async fn handle(&self, batch: Vec<String>) -> Vec<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            // Simulates a wedged worker; only cancel_worker gets us out.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.handled.fetch_add(batch.len(), Ordering::SeqCst);
        Vec::new()
    }
}

fn spawn_run(queue: &Arc<WorkerPoolQueue<String>>) -> (ShutdownSender, ShutdownSender) {
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let (terminate_tx, terminate_rx) = shutdown_channel();
    let q = queue.clone();
    tokio::spawn(async move { q.run(shutdown_rx, terminate_rx).await });
    (shutdown_tx, terminate_tx)
}

#[tokio::test]
async fn test_cancel_worker_unwedges_the_queue() {
    let factory = QueueFactory::new();
    let manager = Manager::new();
    let handler = Arc::new(StuckOnce {
        calls: AtomicUsize::new(0),
        handled: AtomicUsize::new(0),
    });

    let (queue, qid) = factory
        .create_queue::<String>(
            &manager,
            "wedge",
            QueueSettings::default(),
            handler.clone(),
            None,
        )
        .await
        .unwrap();
    let _guards = spawn_run(&queue);

    queue.push(&"job".to_string()).await.unwrap();

    // Wait until the stuck worker shows up in the active set.
    let pid = loop {
        let counts = manager.describe(qid).await.unwrap().workers;
        if let Some(pid) = counts.active.first() {
            break *pid;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert!(manager.cancel_worker(qid, pid).await.unwrap());
    // Cancelling an already-gone pid is a no-op, not an error.
    assert!(!manager.cancel_worker(qid, pid + 1000).await.unwrap());

    // The aborted batch is requeued and the second call handles it.
    queue.flush(Duration::from_secs(10)).await.unwrap();
    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    assert!(handler.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_add_workers_is_visible_and_capped() {
    let factory = QueueFactory::new();
    let manager = Manager::new();
    let handler = Arc::new(forgeq_core::port::HandlerFn(|_: Vec<String>| Vec::new()));

    let settings = QueueSettings {
        workers: 1,
        max_workers: 3,
        ..Default::default()
    };
    let (_queue, qid) = factory
        .create_queue::<String>(&manager, "scalable", settings, handler, None)
        .await
        .unwrap();

    assert_eq!(manager.add_workers(qid, 1).await.unwrap(), 2);
    // Capped at max_workers.
    assert_eq!(manager.add_workers(qid, 10).await.unwrap(), 3);

    let counts = manager.describe(qid).await.unwrap().workers;
    assert_eq!(counts.base, 3);
}

#[tokio::test]
async fn test_unhealthy_flag_clears_after_backend_recovers() {
    use forgeq_core::application::worker::QueueFifo;
    use forgeq_core::port::byte_fifo::mocks::MockFifo;

    let fifo = Arc::new(MockFifo::new());
    let handler = Arc::new(forgeq_core::port::HandlerFn(|_: Vec<String>| Vec::new()));
    let queue = WorkerPoolQueue::new(
        "fragile",
        QueueSettings::default(),
        QueueFifo::Plain(fifo.clone()),
        handler,
    )
    .unwrap();
    let _guards = spawn_run(&queue);

    fifo.fail_next_pops(1);
    // Wait for the failed pop to mark the queue unhealthy.
    let mut saw_unhealthy = false;
    for _ in 0..100 {
        if !queue.is_healthy() {
            saw_unhealthy = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(saw_unhealthy);

    // After the backoff the next pop succeeds and health returns.
    for _ in 0..200 {
        if queue.is_healthy() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("queue never recovered");
}

// WorkerPoolQueue - the scheduling core
//
// One dispatcher task per queue pops batches off the FIFO and hands each
// batch to a worker task gated by a semaphore of worker slots. Handlers
// return the unhandled remainder, which is requeued for a future dispatch
// cycle. Panics are recovered per batch; a pool never dies with its worker.

pub mod constants;
mod shutdown;

use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::domain::{payload, Payload, QueueSettings, QueueType, SettingsUpdate};
use crate::error::{QueueError, Result};
use crate::manager::{QueueControl, WorkerCounts};
use crate::port::byte_fifo::{ByteFifo, PushCallback, UniqueByteFifo};
use crate::port::handler::BatchHandler;

/// The FIFO a pool schedules over: plain, or dedup-aware.
#[derive(Clone)]
pub enum QueueFifo {
    Plain(Arc<dyn ByteFifo>),
    Unique(Arc<dyn UniqueByteFifo>),
}

impl QueueFifo {
    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        match self {
            QueueFifo::Plain(f) => f.pop().await,
            QueueFifo::Unique(f) => f.pop().await,
        }
    }

    async fn len(&self) -> Result<i64> {
        match self {
            QueueFifo::Plain(f) => f.len().await,
            QueueFifo::Unique(f) => f.len().await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            QueueFifo::Plain(f) => f.close().await,
            QueueFifo::Unique(f) => f.close().await,
        }
    }

    async fn push(&self, data: Vec<u8>) -> Result<()> {
        match self {
            QueueFifo::Plain(f) => f.push(data).await,
            QueueFifo::Unique(f) => f.push_if_absent(data, None).await,
        }
    }
}

/// Shared pool state, reachable from the dispatcher, worker supervisors and
/// the manager's control surface.
struct PoolState {
    name: String,
    queue_type: QueueType,
    fifo: QueueFifo,
    settings: RwLock<QueueSettings>,

    /// Worker slots. Permit count = base workers + active boost workers.
    slots: Arc<Semaphore>,
    base_workers: AtomicUsize,
    boosted: AtomicUsize,

    /// Handler invocations currently owned by a worker (or its dispatcher
    /// hand-off), used by flush to decide "nothing in flight".
    in_flight: AtomicUsize,
    active: Mutex<HashMap<u64, AbortHandle>>,
    next_pid: Arc<AtomicU64>,

    paused: tokio::sync::watch::Sender<bool>,
    healthy: AtomicBool,
    closed: AtomicBool,
}

impl PoolState {
    fn mark_backend(&self, ok: bool) {
        self.healthy.store(ok, Ordering::SeqCst);
    }

    /// Push raw bytes back after a failed or aborted batch. For unique
    /// queues a concurrent re-add is fine: the sentinel means the work is
    /// already pending again.
    async fn requeue_raw(&self, raw: Vec<u8>) {
        match self.fifo.push(raw).await {
            Ok(()) | Err(QueueError::AlreadyInQueue) => {}
            Err(err) => {
                self.mark_backend(false);
                error!(
                    queue = %self.name,
                    error = %err,
                    "failed to requeue unhandled item"
                );
            }
        }
    }

    async fn requeue_all(&self, raws: Vec<Vec<u8>>) {
        for raw in raws {
            self.requeue_raw(raw).await;
        }
    }

    /// Shrink the live permit count by `n` without interrupting running
    /// workers: acquired-and-forgotten permits simply never come back.
    fn retire_permits(self: &Arc<Self>, n: usize) {
        if n == 0 {
            return;
        }
        let slots = self.slots.clone();
        tokio::spawn(async move {
            if let Ok(permits) = slots.acquire_many_owned(n as u32).await {
                permits.forget();
            }
        });
    }
}

/// A typed queue with its own dispatcher and worker pool.
pub struct WorkerPoolQueue<P: Payload> {
    state: Arc<PoolState>,
    handler: Arc<dyn BatchHandler<P>>,
}

impl<P: Payload> std::fmt::Debug for WorkerPoolQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolQueue")
            .field("name", &self.state.name)
            .finish_non_exhaustive()
    }
}

impl<P: Payload> WorkerPoolQueue<P> {
    pub fn new(
        name: impl Into<String>,
        settings: QueueSettings,
        fifo: QueueFifo,
        handler: Arc<dyn BatchHandler<P>>,
    ) -> Result<Arc<Self>> {
        Self::with_pid_counter(name, settings, fifo, handler, Arc::new(AtomicU64::new(0)))
    }

    /// Pools that report through one control surface share a pid counter,
    /// so `cancel_worker(pid)` targets exactly one worker across them.
    pub(crate) fn with_pid_counter(
        name: impl Into<String>,
        settings: QueueSettings,
        fifo: QueueFifo,
        handler: Arc<dyn BatchHandler<P>>,
        next_pid: Arc<AtomicU64>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        settings.validate(&name)?;

        let (paused, _) = tokio::sync::watch::channel(false);
        let state = Arc::new(PoolState {
            name,
            queue_type: settings.queue_type,
            fifo,
            slots: Arc::new(Semaphore::new(settings.workers)),
            base_workers: AtomicUsize::new(settings.workers),
            boosted: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            active: Mutex::new(HashMap::new()),
            next_pid,
            paused,
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            settings: RwLock::new(settings),
        });

        Ok(Arc::new(Self { state, handler }))
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Serialize and enqueue one item.
    ///
    /// For unique queues, `QueueError::AlreadyInQueue` signals the work is
    /// already pending; callers treat it as success.
    pub async fn push(&self, item: &P) -> Result<()> {
        let raw = payload::encode(item)?;
        let res = match &self.state.fifo {
            QueueFifo::Plain(f) => f.push(raw).await,
            QueueFifo::Unique(f) => f.push_if_absent(raw, None).await,
        };
        match &res {
            Ok(()) | Err(QueueError::AlreadyInQueue) => self.state.mark_backend(true),
            Err(_) => self.state.mark_backend(false),
        }
        res
    }

    /// Enqueue with a side effect that runs exactly when the item is newly
    /// added (never on a duplicate). Unique queues only.
    pub async fn push_with_callback(&self, item: &P, callback: PushCallback) -> Result<()> {
        let raw = payload::encode(item)?;
        match &self.state.fifo {
            QueueFifo::Unique(f) => f.push_if_absent(raw, Some(callback)).await,
            QueueFifo::Plain(_) => Err(QueueError::Config(format!(
                "queue {} is not a unique queue",
                self.state.name
            ))),
        }
    }

    /// Whether an equal item is already pending. Unique queues only.
    pub async fn has(&self, item: &P) -> Result<bool> {
        let raw = payload::encode(item)?;
        match &self.state.fifo {
            QueueFifo::Unique(f) => f.has(&raw).await,
            QueueFifo::Plain(_) => Err(QueueError::Config(format!(
                "queue {} is not a unique queue",
                self.state.name
            ))),
        }
    }

    /// Run the dispatcher until shutdown; on shutdown, in-flight handler
    /// calls finish, and on terminate whatever is still running is aborted
    /// (its batches are requeued).
    pub async fn run(&self, mut shutdown: ShutdownToken, terminate: ShutdownToken) -> Result<()> {
        info!(
            queue = %self.state.name,
            queue_type = self.state.queue_type.as_str(),
            workers = self.state.base_workers.load(Ordering::SeqCst),
            "worker pool started"
        );

        let mut paused_rx = self.state.paused.subscribe();
        let mut backlog_since: Option<Instant> = None;

        loop {
            if shutdown.is_shutdown() || self.state.closed.load(Ordering::SeqCst) {
                break;
            }

            if *paused_rx.borrow() {
                tokio::select! {
                    _ = paused_rx.changed() => {},
                    _ = shutdown.wait() => break,
                }
                continue;
            }

            self.maybe_boost(&mut backlog_since).await;

            // Counted before the pop, not after: a batch is in flight the
            // instant it leaves the FIFO, and flush must never observe the
            // gap between the pop and its bookkeeping.
            self.state.in_flight.fetch_add(1, Ordering::SeqCst);
            let first = match self.state.fifo.pop().await {
                Ok(Some(raw)) => {
                    self.state.mark_backend(true);
                    raw
                }
                Ok(None) => {
                    self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
                    self.state.mark_backend(true);
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                    continue;
                }
                Err(err) => {
                    self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
                    self.state.mark_backend(false);
                    error!(queue = %self.state.name, error = %err, "pop failed, backing off");
                    tokio::select! {
                        _ = sleep(ERROR_BACKOFF_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                    continue;
                }
            };

            let raws = self.fill_batch(first).await;
            let (items, raws) = self.decode_batch(raws);
            if items.is_empty() {
                self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            let permit = tokio::select! {
                permit = self.state.slots.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => {
                        self.state.requeue_all(raws).await;
                        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                },
                _ = shutdown.wait() => {
                    self.state.requeue_all(raws).await;
                    self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
            };

            self.spawn_batch(items, raws, permit).await;
        }

        self.drain_in_flight(terminate).await;
        info!(queue = %self.state.name, "worker pool stopped");
        Ok(())
    }

    /// Top up a batch without stalling on a trickle of single items.
    async fn fill_batch(&self, first: Vec<u8>) -> Vec<Vec<u8>> {
        let batch_length = self.state.settings.read().await.batch_length;
        let mut batch = vec![first];
        let deadline = Instant::now() + BATCH_FILL_WINDOW;

        while batch.len() < batch_length {
            match self.state.fifo.pop().await {
                Ok(Some(raw)) => batch.push(raw),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    sleep(BATCH_FILL_POLL).await;
                }
                Err(err) => {
                    warn!(queue = %self.state.name, error = %err, "pop failed mid-batch");
                    break;
                }
            }
        }
        batch
    }

    /// Items that do not deserialize into the payload type are dropped with
    /// an error log; they must never crash a worker.
    fn decode_batch(&self, raws: Vec<Vec<u8>>) -> (Vec<P>, Vec<Vec<u8>>) {
        let mut items = Vec::with_capacity(raws.len());
        let mut kept = Vec::with_capacity(raws.len());
        for raw in raws {
            match payload::decode::<P>(&raw) {
                Ok(item) => {
                    items.push(item);
                    kept.push(raw);
                }
                Err(err) => {
                    error!(
                        queue = %self.state.name,
                        payload_type = type_name::<P>(),
                        error = %err,
                        "dropping item that does not deserialize"
                    );
                }
            }
        }
        (items, kept)
    }

    /// Hand a decoded batch to a worker task. The raw bytes ride along so a
    /// panicked or cancelled worker can requeue the whole batch.
    async fn spawn_batch(&self, items: Vec<P>, raws: Vec<Vec<u8>>, permit: OwnedSemaphorePermit) {
        let state = self.state.clone();
        let handler = self.handler.clone();
        let pid = self.state.next_pid.fetch_add(1, Ordering::SeqCst) + 1;

        let worker = tokio::spawn(async move { handler.handle(items).await });
        self.state
            .active
            .lock()
            .await
            .insert(pid, worker.abort_handle());

        tokio::spawn(async move {
            let result = worker.await;
            state.active.lock().await.remove(&pid);

            match result {
                Ok(unhandled) => {
                    if !unhandled.is_empty() {
                        warn!(
                            queue = %state.name,
                            unhandled = unhandled.len(),
                            "handler reported unhandled items, requeueing"
                        );
                        for item in unhandled {
                            match payload::encode(&item) {
                                Ok(raw) => state.requeue_raw(raw).await,
                                Err(err) => error!(
                                    queue = %state.name,
                                    error = %err,
                                    "cannot re-serialize unhandled item"
                                ),
                            }
                        }
                    }
                }
                Err(join_err) if join_err.is_panic() => {
                    // Payloads are elided to the type name: arbitrary user
                    // data must not reach the logs.
                    error!(
                        queue = %state.name,
                        worker_pid = pid,
                        payload_type = type_name::<P>(),
                        "handler panicked, requeueing batch"
                    );
                    state.requeue_all(raws).await;
                }
                Err(_) => {
                    warn!(
                        queue = %state.name,
                        worker_pid = pid,
                        "worker cancelled, requeueing batch"
                    );
                    state.requeue_all(raws).await;
                }
            }

            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    /// Boost the pool when the backlog stays above the threshold for the
    /// configured duration; a retire task takes the extra permits back once
    /// the backlog subsides and a cooldown elapses.
    async fn maybe_boost(&self, backlog_since: &mut Option<Instant>) {
        if self.state.boosted.load(Ordering::SeqCst) > 0 {
            return;
        }

        let (threshold, boost_timeout, boost_workers, max_workers) = {
            let s = self.state.settings.read().await;
            (
                s.effective_boost_threshold(),
                s.boost_timeout(),
                s.boost_workers,
                s.max_workers,
            )
        };

        let len = self.state.fifo.len().await.unwrap_or(0);
        if (len as usize) <= threshold {
            *backlog_since = None;
            return;
        }

        let since = *backlog_since.get_or_insert_with(Instant::now);
        if since.elapsed() < boost_timeout {
            return;
        }

        let current = self.state.base_workers.load(Ordering::SeqCst);
        if boost_workers == 0 || current >= max_workers {
            return;
        }
        let add = boost_workers.min(max_workers - current);

        self.state.boosted.store(add, Ordering::SeqCst);
        self.state.slots.add_permits(add);
        *backlog_since = None;
        info!(
            queue = %self.state.name,
            backlog = len,
            boost_workers = add,
            "boosting worker pool under sustained backlog"
        );

        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                if state.closed.load(Ordering::SeqCst) {
                    break;
                }
                let len = state.fifo.len().await.unwrap_or(0);
                let threshold = state.settings.read().await.effective_boost_threshold();
                if (len as usize) <= threshold {
                    break;
                }
                sleep(BOOST_BACKLOG_POLL).await;
            }

            let cooldown = state.settings.read().await.boost_timeout();
            sleep(cooldown).await;

            // `boosted` stays non-zero until the permits are actually
            // back, so a fresh boost cannot stack on unreclaimed ones.
            if let Ok(permits) = state.slots.clone().acquire_many_owned(add as u32).await {
                permits.forget();
            }
            state.boosted.store(0, Ordering::SeqCst);
            info!(queue = %state.name, retired = add, "boost workers retired");
        });
    }

    /// Wait for in-flight handler calls; abort the stragglers on terminate.
    async fn drain_in_flight(&self, mut terminate: ShutdownToken) {
        loop {
            if self.state.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            if terminate.is_shutdown() {
                break;
            }
            tokio::select! {
                _ = sleep(FLUSH_POLL_INTERVAL) => {},
                _ = terminate.wait() => break,
            }
        }

        let handles: Vec<(u64, AbortHandle)> =
            self.state.active.lock().await.drain().collect();
        for (pid, handle) in handles {
            warn!(queue = %self.state.name, worker_pid = pid, "terminating worker");
            handle.abort();
        }

        // Give supervisors a bounded window to requeue aborted batches.
        let _ = tokio::time::timeout(TERMINATE_DRAIN_TIMEOUT, async {
            while self.state.in_flight.load(Ordering::SeqCst) > 0 {
                sleep(BATCH_FILL_POLL).await;
            }
        })
        .await;
    }

    /// Block until the FIFO is empty and nothing is in flight, or time out.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let len = self.state.fifo.len().await.unwrap_or(i64::MAX);
                if len == 0 && self.state.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                sleep(FLUSH_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| QueueError::FlushTimeout(timeout))
    }
}

#[async_trait::async_trait]
impl<P: Payload> QueueControl for WorkerPoolQueue<P> {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn queue_type(&self) -> QueueType {
        self.state.queue_type
    }

    fn payload_type(&self) -> &'static str {
        type_name::<P>()
    }

    async fn len(&self) -> Result<i64> {
        self.state.fifo.len().await
    }

    async fn workers(&self) -> WorkerCounts {
        WorkerCounts {
            base: self.state.base_workers.load(Ordering::SeqCst),
            boosted: self.state.boosted.load(Ordering::SeqCst),
            in_flight: self.state.in_flight.load(Ordering::SeqCst),
            active: self.state.active.lock().await.keys().copied().collect(),
        }
    }

    fn is_paused(&self) -> bool {
        *self.state.paused.borrow()
    }

    fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
    }

    async fn add_workers(&self, count: usize) -> Result<usize> {
        if count == 0 {
            return Ok(self.state.base_workers.load(Ordering::SeqCst));
        }
        let mut settings = self.state.settings.write().await;
        let current = self.state.base_workers.load(Ordering::SeqCst);
        let target = (current + count).min(settings.max_workers);
        let added = target - current;
        if added > 0 {
            self.state.base_workers.store(target, Ordering::SeqCst);
            settings.workers = target;
            self.state.slots.add_permits(added);
            info!(queue = %self.state.name, workers = target, "worker count raised");
        }
        Ok(target)
    }

    async fn set_settings(&self, update: SettingsUpdate) -> Result<()> {
        let mut settings = self.state.settings.write().await;

        if let Some(batch_length) = update.batch_length {
            if batch_length == 0 {
                return Err(QueueError::Config("batch_length must be at least 1".into()));
            }
            settings.batch_length = batch_length;
        }
        if let Some(max_workers) = update.max_workers {
            if max_workers == 0 {
                return Err(QueueError::Config("max_workers must be at least 1".into()));
            }
            settings.max_workers = max_workers;
        }
        if let Some(boost_workers) = update.boost_workers {
            settings.boost_workers = boost_workers;
        }
        if let Some(boost_timeout_ms) = update.boost_timeout_ms {
            settings.boost_timeout_ms = boost_timeout_ms;
        }
        if let Some(workers) = update.workers {
            if workers == 0 {
                return Err(QueueError::Config("workers must be at least 1".into()));
            }
            if workers > settings.max_workers {
                return Err(QueueError::Config(format!(
                    "workers ({workers}) above max_workers ({})",
                    settings.max_workers
                )));
            }
            let old = self.state.base_workers.swap(workers, Ordering::SeqCst);
            settings.workers = workers;
            if workers > old {
                self.state.slots.add_permits(workers - old);
            } else if workers < old {
                self.state.retire_permits(old - workers);
            }
            info!(queue = %self.state.name, workers, "worker count updated");
        }
        Ok(())
    }

    async fn pause(&self) {
        self.state.paused.send_replace(true);
        info!(queue = %self.state.name, "queue paused");
    }

    async fn resume(&self) {
        self.state.paused.send_replace(false);
        info!(queue = %self.state.name, "queue resumed");
    }

    async fn cancel_worker(&self, pid: u64) -> bool {
        let active = self.state.active.lock().await;
        match active.get(&pid) {
            Some(handle) => {
                handle.abort();
                warn!(queue = %self.state.name, worker_pid = pid, "worker cancelled");
                true
            }
            None => false,
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        WorkerPoolQueue::flush(self, timeout).await
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.fifo.close().await
    }
}

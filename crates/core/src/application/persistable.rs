// Persistable queue - channel live path backed by a durable store
//
// Composition, not a new primitive: a channel-backed pool is the fast path
// and a disk- or Redis-backed pool of the same payload type is the durable
// side. The durable store is replayed into the channel at startup before
// producers are accepted, catches overflow when the channel is full, and
// receives whatever the channel still holds when the pools stop, so a
// restart loses nothing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::application::worker::constants::FLUSH_POLL_INTERVAL;
use crate::application::worker::{QueueFifo, ShutdownToken, WorkerPoolQueue};
use crate::backend::channel::ChannelByteFifo;
use crate::domain::{payload, Payload, QueueSettings, QueueType, SettingsUpdate};
use crate::error::{QueueError, Result};
use crate::manager::{QueueControl, WorkerCounts};
use crate::port::byte_fifo::ByteFifo;
use crate::port::handler::BatchHandler;

pub struct PersistableQueue<P: Payload> {
    name: String,
    live: Arc<WorkerPoolQueue<P>>,
    durable: Arc<WorkerPoolQueue<P>>,
    channel: Arc<ChannelByteFifo>,
    durable_fifo: Arc<dyn ByteFifo>,
    ready: AtomicBool,
}

impl<P: Payload> PersistableQueue<P> {
    /// `durable_fifo` is the overflow/recovery store (disk log or Redis
    /// list); the bounded channel is created here from `settings.length`.
    pub fn new(
        name: impl Into<String>,
        settings: QueueSettings,
        durable_fifo: Arc<dyn ByteFifo>,
        handler: Arc<dyn BatchHandler<P>>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        settings.validate(&name)?;

        let channel = Arc::new(ChannelByteFifo::new(settings.length));

        // Both pools answer to one cancel/describe surface, so their
        // worker pids must come from one counter.
        let pids = Arc::new(AtomicU64::new(0));

        let live = WorkerPoolQueue::with_pid_counter(
            name.clone(),
            settings.clone(),
            QueueFifo::Plain(channel.clone()),
            handler.clone(),
            pids.clone(),
        )?;

        // The durable side runs a single worker: it only has to keep the
        // overflow lane moving, the channel pool does the real work.
        let durable_settings = QueueSettings {
            workers: 1,
            boost_workers: 0,
            ..settings
        };
        let durable = WorkerPoolQueue::with_pid_counter(
            format!("{name}-durable"),
            durable_settings,
            QueueFifo::Plain(durable_fifo.clone()),
            handler,
            pids,
        )?;

        Ok(Arc::new(Self {
            name,
            live,
            durable,
            channel,
            durable_fifo,
            ready: AtomicBool::new(false),
        }))
    }

    /// Enqueue one item: channel first, durable store when the channel is
    /// full, durable store always before startup replay has finished.
    pub async fn push(&self, item: &P) -> Result<()> {
        let raw = payload::encode(item)?;
        if !self.ready.load(Ordering::SeqCst) {
            return self.durable_fifo.push(raw).await;
        }
        match self.channel.try_push(raw).await {
            Ok(()) => Ok(()),
            Err(raw) => {
                warn!(queue = %self.name, "channel full, overflowing to durable store");
                self.durable_fifo.push(raw).await
            }
        }
    }

    /// Run both pools. Startup order matters: the channel pool starts
    /// first, then the durable store is replayed into the channel, and only
    /// then does the queue report ready and start the overflow pool.
    pub async fn run(&self, shutdown: ShutdownToken, terminate: ShutdownToken) -> Result<()> {
        let live = self.live.clone();
        let (live_shutdown, live_terminate) = (shutdown.clone(), terminate.clone());
        let live_handle =
            tokio::spawn(async move { live.run(live_shutdown, live_terminate).await });

        let mut restored = 0u64;
        loop {
            match self.durable_fifo.pop().await {
                Ok(Some(raw)) => {
                    self.channel.push(raw).await?;
                    restored += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    error!(queue = %self.name, error = %err, "startup replay aborted");
                    break;
                }
            }
        }
        if restored > 0 {
            info!(queue = %self.name, restored, "replayed persisted items");
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(queue = %self.name, "persistable queue ready");

        let durable = self.durable.clone();
        let durable_handle =
            tokio::spawn(async move { durable.run(shutdown, terminate).await });

        let _ = live_handle.await;
        let _ = durable_handle.await;

        // Pools are down; whatever the channel still buffers would be lost
        // with the process. Hand it to the durable store for next startup.
        self.ready.store(false, Ordering::SeqCst);
        let mut persisted = 0u64;
        while let Ok(Some(raw)) = self.channel.pop().await {
            if let Err(err) = self.durable_fifo.push(raw).await {
                error!(queue = %self.name, error = %err, "failed to persist buffered item");
                break;
            }
            persisted += 1;
        }
        if persisted > 0 {
            info!(queue = %self.name, persisted, "persisted unprocessed items for restart");
        }
        Ok(())
    }

    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let channel_len = self.channel.len().await.unwrap_or(i64::MAX);
                let durable_len = self.durable_fifo.len().await.unwrap_or(i64::MAX);
                let in_flight = QueueControl::workers(self.live.as_ref()).await.in_flight
                    + QueueControl::workers(self.durable.as_ref()).await.in_flight;
                if channel_len == 0 && durable_len == 0 && in_flight == 0 {
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
impl<P: Payload> QueueControl for PersistableQueue<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_type(&self) -> QueueType {
        QueueType::Persistable
    }

    fn payload_type(&self) -> &'static str {
        std::any::type_name::<P>()
    }

    async fn len(&self) -> Result<i64> {
        Ok(self.channel.len().await? + self.durable_fifo.len().await?)
    }

    async fn workers(&self) -> WorkerCounts {
        let live = QueueControl::workers(self.live.as_ref()).await;
        let durable = QueueControl::workers(self.durable.as_ref()).await;
        WorkerCounts {
            base: live.base + durable.base,
            boosted: live.boosted + durable.boosted,
            in_flight: live.in_flight + durable.in_flight,
            active: live.active.into_iter().chain(durable.active).collect(),
        }
    }

    fn is_paused(&self) -> bool {
        self.live.is_paused()
    }

    fn is_healthy(&self) -> bool {
        self.live.is_healthy() && self.durable.is_healthy()
    }

    async fn add_workers(&self, count: usize) -> Result<usize> {
        QueueControl::add_workers(self.live.as_ref(), count).await
    }

    async fn set_settings(&self, update: SettingsUpdate) -> Result<()> {
        QueueControl::set_settings(self.live.as_ref(), update).await
    }

    async fn pause(&self) {
        QueueControl::pause(self.live.as_ref()).await;
        QueueControl::pause(self.durable.as_ref()).await;
    }

    async fn resume(&self) {
        QueueControl::resume(self.live.as_ref()).await;
        QueueControl::resume(self.durable.as_ref()).await;
    }

    async fn cancel_worker(&self, pid: u64) -> bool {
        QueueControl::cancel_worker(self.live.as_ref(), pid).await
            || QueueControl::cancel_worker(self.durable.as_ref(), pid).await
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        PersistableQueue::flush(self, timeout).await
    }

    async fn close(&self) -> Result<()> {
        // Only safe once run() has returned: the final persist pass pushes
        // into the durable store.
        QueueControl::close(self.live.as_ref()).await?;
        QueueControl::close(self.durable.as_ref()).await
    }
}

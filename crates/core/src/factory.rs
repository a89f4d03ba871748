// Queue factory - backend selection keyed on the configured queue type
//
// Infra crates contribute a FifoProvider per backend kind; the channel
// provider is built in. An unknown backend at registration time is a fatal
// configuration error, same as a duplicate queue name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::persistable::PersistableQueue;
use crate::application::worker::{QueueFifo, WorkerPoolQueue};
use crate::backend::channel::{ChannelByteFifo, ChannelUniqueByteFifo};
use crate::domain::{BackendKind, Payload, QueueSettings};
use crate::error::{QueueError, Result};
use crate::manager::Manager;
use crate::port::byte_fifo::{whole_payload_key, ByteFifo, DedupKeyFn, UniqueByteFifo};
use crate::port::handler::BatchHandler;

/// Constructs FIFOs for one backend kind.
#[async_trait]
pub trait FifoProvider: Send + Sync {
    async fn byte_fifo(
        &self,
        queue_name: &str,
        settings: &QueueSettings,
    ) -> Result<Arc<dyn ByteFifo>>;

    async fn unique_byte_fifo(
        &self,
        queue_name: &str,
        settings: &QueueSettings,
        key_fn: DedupKeyFn,
    ) -> Result<Arc<dyn UniqueByteFifo>>;
}

/// The built-in in-process backend.
struct ChannelProvider;

#[async_trait]
impl FifoProvider for ChannelProvider {
    async fn byte_fifo(
        &self,
        _queue_name: &str,
        settings: &QueueSettings,
    ) -> Result<Arc<dyn ByteFifo>> {
        Ok(Arc::new(ChannelByteFifo::new(settings.length)))
    }

    async fn unique_byte_fifo(
        &self,
        _queue_name: &str,
        settings: &QueueSettings,
        key_fn: DedupKeyFn,
    ) -> Result<Arc<dyn UniqueByteFifo>> {
        Ok(Arc::new(ChannelUniqueByteFifo::new(settings.length, key_fn)))
    }
}

/// Registry of backend providers plus typed queue construction.
pub struct QueueFactory {
    providers: HashMap<BackendKind, Arc<dyn FifoProvider>>,
}

impl Default for QueueFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueFactory {
    pub fn new() -> Self {
        let mut providers: HashMap<BackendKind, Arc<dyn FifoProvider>> = HashMap::new();
        providers.insert(BackendKind::Channel, Arc::new(ChannelProvider));
        Self { providers }
    }

    /// Wire in an infra backend (disk, Redis).
    pub fn register_provider(&mut self, kind: BackendKind, provider: Arc<dyn FifoProvider>) {
        self.providers.insert(kind, provider);
    }

    fn provider(&self, kind: BackendKind) -> Result<&Arc<dyn FifoProvider>> {
        self.providers.get(&kind).ok_or_else(|| {
            QueueError::Config(format!(
                "no provider registered for backend {}",
                kind.as_str()
            ))
        })
    }

    /// Build the FIFO a queue's settings call for. `key_fn` only applies to
    /// unique queue types; None selects whole-payload keying.
    pub async fn make_fifo(
        &self,
        queue_name: &str,
        settings: &QueueSettings,
        key_fn: Option<DedupKeyFn>,
    ) -> Result<QueueFifo> {
        let provider = self.provider(settings.queue_type.backend())?;
        if settings.queue_type.is_unique() {
            let key_fn = key_fn.unwrap_or_else(whole_payload_key);
            Ok(QueueFifo::Unique(
                provider
                    .unique_byte_fifo(queue_name, settings, key_fn)
                    .await?,
            ))
        } else {
            Ok(QueueFifo::Plain(
                provider.byte_fifo(queue_name, settings).await?,
            ))
        }
    }

    /// Create and register a worker-pool queue (all non-persistable types).
    pub async fn create_queue<P: Payload>(
        &self,
        manager: &Manager,
        name: &str,
        settings: QueueSettings,
        handler: Arc<dyn BatchHandler<P>>,
        key_fn: Option<DedupKeyFn>,
    ) -> Result<(Arc<WorkerPoolQueue<P>>, u64)> {
        settings.validate(name)?;
        let fifo = self.make_fifo(name, &settings, key_fn).await?;
        let queue = WorkerPoolQueue::new(name, settings, fifo, handler)?;
        let qid = manager.register(queue.clone()).await?;
        Ok((queue, qid))
    }

    /// Create and register a persistable queue. The durable side is Redis
    /// when a connection string is configured, the disk log otherwise.
    pub async fn create_persistable_queue<P: Payload>(
        &self,
        manager: &Manager,
        name: &str,
        settings: QueueSettings,
        handler: Arc<dyn BatchHandler<P>>,
    ) -> Result<(Arc<PersistableQueue<P>>, u64)> {
        settings.validate(name)?;
        let durable_kind = if settings.conn_str.is_empty() {
            BackendKind::Disk
        } else {
            BackendKind::Redis
        };
        let provider = self.provider(durable_kind)?;
        let durable_fifo = provider.byte_fifo(name, &settings).await?;
        let queue = PersistableQueue::new(name, settings, durable_fifo, handler)?;
        let qid = manager.register(queue.clone()).await?;
        Ok((queue, qid))
    }
}

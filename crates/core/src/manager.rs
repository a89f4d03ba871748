// Queue Manager - process-wide registry and operator control surface
//
// An explicit struct constructed once at startup and passed by reference,
// not a package-level mutable map. The registry mutex guards registration
// and lookup only, never item traffic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::domain::{QueueType, SettingsUpdate};
use crate::error::{QueueError, Result};

/// Worker-pool occupancy snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerCounts {
    /// Base worker slots.
    pub base: usize,
    /// Temporary boost slots currently active.
    pub boosted: usize,
    /// Handler invocations in flight.
    pub in_flight: usize,
    /// PIDs of running workers, for targeted cancellation.
    pub active: Vec<u64>,
}

/// Type-erased handle the manager holds per queue.
///
/// Implemented by `WorkerPoolQueue<P>` and `PersistableQueue<P>`; the
/// payload type is erased down to its name for inspection.
#[async_trait]
pub trait QueueControl: Send + Sync {
    fn name(&self) -> &str;
    fn queue_type(&self) -> QueueType;
    fn payload_type(&self) -> &'static str;
    async fn len(&self) -> Result<i64>;
    async fn workers(&self) -> WorkerCounts;
    fn is_paused(&self) -> bool;
    fn is_healthy(&self) -> bool;

    /// Raise the base worker count by `count`, bounded by max_workers.
    /// Returns the new base count.
    async fn add_workers(&self, count: usize) -> Result<usize>;
    /// Apply a partial settings update live, no restart.
    async fn set_settings(&self, update: SettingsUpdate) -> Result<()>;
    async fn pause(&self);
    async fn resume(&self);
    /// Force-terminate one stuck worker; the rest of the pool is untouched.
    async fn cancel_worker(&self, pid: u64) -> bool;
    async fn flush(&self, timeout: Duration) -> Result<()>;
    /// Close the backing store. Call only after the queue's run() returned.
    async fn close(&self) -> Result<()>;
}

/// Snapshot of one registered queue for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub qid: u64,
    pub name: String,
    pub queue_type: QueueType,
    pub payload_type: String,
    /// None when the backend cannot report a length right now.
    pub len: Option<i64>,
    pub workers: WorkerCounts,
    pub paused: bool,
    pub healthy: bool,
}

struct Registry {
    next_qid: u64,
    queues: BTreeMap<u64, Arc<dyn QueueControl>>,
    names: HashMap<String, u64>,
}

/// Process-wide queue registry.
pub struct Manager {
    registry: Mutex<Registry>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_qid: 0,
                queues: BTreeMap::new(),
                names: HashMap::new(),
            }),
        }
    }

    /// Register a queue and return its id.
    ///
    /// A duplicate name is a fatal configuration error: the process must
    /// not start with an inconsistent queue topology.
    pub async fn register(&self, queue: Arc<dyn QueueControl>) -> Result<u64> {
        let mut registry = self.registry.lock().await;
        let name = queue.name().to_string();
        if registry.names.contains_key(&name) {
            return Err(QueueError::Config(format!(
                "queue {name} is already registered"
            )));
        }
        registry.next_qid += 1;
        let qid = registry.next_qid;
        registry.names.insert(name.clone(), qid);
        registry.queues.insert(qid, queue);
        info!(qid, queue = %name, "queue registered");
        Ok(qid)
    }

    pub async fn get(&self, qid: u64) -> Option<Arc<dyn QueueControl>> {
        self.registry.lock().await.queues.get(&qid).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<dyn QueueControl>> {
        let registry = self.registry.lock().await;
        let qid = registry.names.get(name)?;
        registry.queues.get(qid).cloned()
    }

    async fn lookup(&self, qid: u64) -> Result<Arc<dyn QueueControl>> {
        self.get(qid)
            .await
            .ok_or_else(|| QueueError::NotFound(format!("queue id {qid}")))
    }

    async fn describe_one(qid: u64, queue: &Arc<dyn QueueControl>) -> QueueDescriptor {
        QueueDescriptor {
            qid,
            name: queue.name().to_string(),
            queue_type: queue.queue_type(),
            payload_type: queue.payload_type().to_string(),
            len: queue.len().await.ok(),
            workers: queue.workers().await,
            paused: queue.is_paused(),
            healthy: queue.is_healthy(),
        }
    }

    /// Snapshot of all queues, ordered by qid.
    pub async fn list(&self) -> Vec<QueueDescriptor> {
        let queues: Vec<(u64, Arc<dyn QueueControl>)> = {
            let registry = self.registry.lock().await;
            registry
                .queues
                .iter()
                .map(|(qid, q)| (*qid, q.clone()))
                .collect()
        };

        let mut out = Vec::with_capacity(queues.len());
        for (qid, queue) in &queues {
            out.push(Self::describe_one(*qid, queue).await);
        }
        out
    }

    pub async fn describe(&self, qid: u64) -> Result<QueueDescriptor> {
        let queue = self.lookup(qid).await?;
        Ok(Self::describe_one(qid, &queue).await)
    }

    pub async fn add_workers(&self, qid: u64, count: usize) -> Result<usize> {
        self.lookup(qid).await?.add_workers(count).await
    }

    pub async fn set_settings(&self, qid: u64, update: SettingsUpdate) -> Result<()> {
        self.lookup(qid).await?.set_settings(update).await
    }

    pub async fn pause(&self, qid: u64) -> Result<()> {
        self.lookup(qid).await?.pause().await;
        Ok(())
    }

    pub async fn resume(&self, qid: u64) -> Result<()> {
        self.lookup(qid).await?.resume().await;
        Ok(())
    }

    pub async fn cancel_worker(&self, qid: u64, pid: u64) -> Result<bool> {
        Ok(self.lookup(qid).await?.cancel_worker(pid).await)
    }

    pub async fn flush(&self, qid: u64, timeout: Duration) -> Result<()> {
        self.lookup(qid).await?.flush(timeout).await
    }

    /// Teardown: best-effort flush of every queue within `timeout` each,
    /// then close backing stores. Call after the queues' run() tasks have
    /// been shut down.
    pub async fn shutdown_all(&self, timeout: Duration) {
        let queues: Vec<Arc<dyn QueueControl>> = {
            let registry = self.registry.lock().await;
            registry.queues.values().cloned().collect()
        };

        for queue in queues {
            if let Err(err) = queue.flush(timeout).await {
                error!(queue = %queue.name(), error = %err, "flush on shutdown failed");
            }
            if let Err(err) = queue.close().await {
                error!(queue = %queue.name(), error = %err, "close failed");
            }
        }
        info!("all queues shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::{QueueFifo, WorkerPoolQueue};
    use crate::backend::channel::ChannelByteFifo;
    use crate::domain::QueueSettings;
    use crate::port::handler::HandlerFn;

    fn test_queue(name: &str) -> Arc<WorkerPoolQueue<String>> {
        WorkerPoolQueue::new(
            name,
            QueueSettings::default(),
            QueueFifo::Plain(Arc::new(ChannelByteFifo::new(10))),
            Arc::new(HandlerFn(|_: Vec<String>| Vec::new())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let manager = Manager::new();
        let qid = manager.register(test_queue("mail")).await.unwrap();

        assert!(manager.get(qid).await.is_some());
        assert!(manager.get_by_name("mail").await.is_some());
        assert!(manager.get(qid + 1).await.is_none());

        let list = manager.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "mail");
        assert_eq!(list[0].len, Some(0));
    }

    #[tokio::test]
    async fn test_duplicate_name_is_config_error() {
        let manager = Manager::new();
        manager.register(test_queue("mail")).await.unwrap();

        let err = manager.register(test_queue("mail")).await.unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_qid_is_not_found() {
        let manager = Manager::new();
        let err = manager.add_workers(7, 1).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }
}

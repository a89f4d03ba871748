// Queue configuration model
//
// Supplied by the registering component at queue-registration time; the
// surrounding server's configuration-file parsing is out of scope here.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};

/// Backend kind a FIFO provider is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Channel,
    Disk,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Channel => "channel",
            BackendKind::Disk => "disk",
            BackendKind::Redis => "redis",
        }
    }
}

/// Logical queue type selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueType {
    Channel,
    Disk,
    Redis,
    Persistable,
    UniqueChannel,
    UniqueDisk,
    UniqueRedis,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Channel => "channel",
            QueueType::Disk => "disk",
            QueueType::Redis => "redis",
            QueueType::Persistable => "persistable",
            QueueType::UniqueChannel => "unique-channel",
            QueueType::UniqueDisk => "unique-disk",
            QueueType::UniqueRedis => "unique-redis",
        }
    }

    /// The backend the queue's primary FIFO lives on.
    pub fn backend(&self) -> BackendKind {
        match self {
            QueueType::Channel | QueueType::UniqueChannel | QueueType::Persistable => {
                BackendKind::Channel
            }
            QueueType::Disk | QueueType::UniqueDisk => BackendKind::Disk,
            QueueType::Redis | QueueType::UniqueRedis => BackendKind::Redis,
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(
            self,
            QueueType::UniqueChannel | QueueType::UniqueDisk | QueueType::UniqueRedis
        )
    }
}

impl std::str::FromStr for QueueType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "channel" => Ok(QueueType::Channel),
            "disk" => Ok(QueueType::Disk),
            "redis" => Ok(QueueType::Redis),
            "persistable" => Ok(QueueType::Persistable),
            "unique-channel" => Ok(QueueType::UniqueChannel),
            "unique-disk" => Ok(QueueType::UniqueDisk),
            "unique-redis" => Ok(QueueType::UniqueRedis),
            other => Err(QueueError::Config(format!("unknown queue type: {other}"))),
        }
    }
}

/// Per-queue settings.
///
/// `boost_threshold` of zero means "derive from batch_length * workers".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub queue_type: QueueType,

    /// Channel capacity (channel-backed and persistable queues).
    pub length: usize,

    /// Maximum items handed to the handler per invocation.
    pub batch_length: usize,

    /// Base worker count (concurrent handler invocations).
    pub workers: usize,

    /// Hard ceiling on worker count, including boost workers.
    pub max_workers: usize,

    /// Extra workers added while the backlog is sustained.
    pub boost_workers: usize,

    /// How long the backlog must be sustained before boosting, and the
    /// cooldown before boosted workers are retired.
    pub boost_timeout_ms: u64,

    /// Backlog length that triggers a boost. Zero derives the default.
    pub boost_threshold: usize,

    /// Default bound for flush operations.
    pub flush_timeout_ms: u64,

    /// Backend connection string (Redis URL for redis-backed queues).
    pub conn_str: String,

    /// Companion membership-set key for unique Redis queues.
    /// Empty means `<queue name>_unique`.
    pub set_name: String,

    /// Data directory for disk-backed queues.
    pub data_dir: PathBuf,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            queue_type: QueueType::Channel,
            length: 100,
            batch_length: 20,
            workers: 1,
            max_workers: 10,
            boost_workers: 5,
            boost_timeout_ms: 5_000,
            boost_threshold: 0,
            flush_timeout_ms: 10_000,
            conn_str: String::new(),
            set_name: String::new(),
            data_dir: PathBuf::from("data/queues"),
        }
    }
}

impl QueueSettings {
    pub fn boost_timeout(&self) -> Duration {
        Duration::from_millis(self.boost_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Effective backlog threshold that triggers a boost.
    pub fn effective_boost_threshold(&self) -> usize {
        if self.boost_threshold > 0 {
            self.boost_threshold
        } else {
            self.batch_length * self.workers.max(1)
        }
    }

    /// Validate settings at registration time. Configuration errors are
    /// fatal at startup: the process must not run with an inconsistent
    /// queue topology.
    pub fn validate(&self, queue_name: &str) -> Result<()> {
        if queue_name.is_empty() {
            return Err(QueueError::Config("queue name must not be empty".into()));
        }
        if self.batch_length == 0 {
            return Err(QueueError::Config(format!(
                "queue {queue_name}: batch_length must be at least 1"
            )));
        }
        if self.workers == 0 {
            return Err(QueueError::Config(format!(
                "queue {queue_name}: workers must be at least 1"
            )));
        }
        if self.max_workers < self.workers {
            return Err(QueueError::Config(format!(
                "queue {queue_name}: max_workers ({}) below workers ({})",
                self.max_workers, self.workers
            )));
        }
        if self.queue_type.backend() == BackendKind::Channel && self.length == 0 {
            return Err(QueueError::Config(format!(
                "queue {queue_name}: channel length must be at least 1"
            )));
        }
        if self.queue_type.backend() == BackendKind::Redis && self.conn_str.is_empty() {
            return Err(QueueError::Config(format!(
                "queue {queue_name}: redis queues require conn_str"
            )));
        }
        Ok(())
    }
}

/// Partial settings update applied live through the manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub workers: Option<usize>,
    pub max_workers: Option<usize>,
    pub batch_length: Option<usize>,
    pub boost_workers: Option<usize>,
    pub boost_timeout_ms: Option<u64>,
}

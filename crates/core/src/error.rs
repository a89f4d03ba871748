// Central error type for the queue framework

use std::time::Duration;

use thiserror::Error;

/// Queue-level error type
#[derive(Error, Debug)]
pub enum QueueError {
    /// Sentinel, not a failure: a unique queue already holds an unresolved
    /// entry for this payload. Callers must treat this as success.
    #[error("item is already in the queue")]
    AlreadyInQueue,

    /// The queue (or its backing FIFO) has been closed.
    #[error("queue is shut down")]
    Shutdown,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),
}

impl QueueError {
    /// True for the dedup sentinel, which producers treat as success.
    pub fn is_already_queued(&self) -> bool {
        matches!(self, QueueError::AlreadyInQueue)
    }
}

/// Result type alias using QueueError
pub type Result<T> = std::result::Result<T, QueueError>;

// From implementation for infra crates (to avoid circular dependency)
impl From<String> for QueueError {
    fn from(err: String) -> Self {
        QueueError::Backend(err)
    }
}

// Note: redis::RedisError conversion is handled in the infra-redis crate
// by converting to QueueError::Backend(String)

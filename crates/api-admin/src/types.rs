//! RPC request/response types
//!
//! Method parameters and results for the queue admin methods. Queues are
//! addressed by qid; `queue.list.v1` is the discovery point.

use serde::{Deserialize, Serialize};

use forgeq_core::domain::SettingsUpdate;
use forgeq_core::manager::QueueDescriptor;

/// queue.list.v1 - List all registered queues
#[derive(Debug, Deserialize)]
pub struct ListQueuesRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct ListQueuesResponse {
    pub queues: Vec<QueueDescriptor>,
}

/// queue.get.v1 - Inspect one queue
#[derive(Debug, Deserialize)]
pub struct GetQueueRequest {
    pub qid: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetQueueResponse {
    pub queue: QueueDescriptor,
}

/// queue.set_settings.v1 - Apply a partial settings update live
#[derive(Debug, Deserialize)]
pub struct SetSettingsRequest {
    pub qid: u64,
    #[serde(flatten)]
    pub update: SettingsUpdate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetSettingsResponse {
    pub qid: u64,
    pub applied: bool,
}

/// queue.add_workers.v1 - Raise the base worker count
#[derive(Debug, Deserialize)]
pub struct AddWorkersRequest {
    pub qid: u64,
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

fn default_worker_count() -> usize {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct AddWorkersResponse {
    pub qid: u64,
    pub base_workers: usize,
}

/// queue.cancel_worker.v1 - Force-terminate one worker
#[derive(Debug, Deserialize)]
pub struct CancelWorkerRequest {
    pub qid: u64,
    pub pid: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelWorkerResponse {
    pub qid: u64,
    pub pid: u64,
    pub cancelled: bool,
}

/// queue.flush.v1 - Block until the queue is empty
#[derive(Debug, Deserialize)]
pub struct FlushRequest {
    pub qid: u64,
    #[serde(default = "default_flush_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    pub qid: u64,
    pub flushed: bool,
}

/// queue.pause.v1 / queue.resume.v1 - Stop and restart dispatching
#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    pub qid: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PauseResponse {
    pub qid: u64,
    pub paused: bool,
}

// Application Layer - Queue scheduling

pub mod persistable;
pub mod worker;

// Re-exports
pub use persistable::PersistableQueue;
pub use worker::{shutdown_channel, QueueFifo, ShutdownSender, ShutdownToken, WorkerPoolQueue};

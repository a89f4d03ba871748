// Domain Layer - Queue configuration and payload model

pub mod payload;
pub mod settings;

// Re-exports
pub use payload::Payload;
pub use settings::{BackendKind, QueueSettings, QueueType, SettingsUpdate};

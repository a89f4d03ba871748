// Port Layer - Interfaces for backend stores and business handlers

pub mod byte_fifo;
pub mod handler;

// Re-exports
pub use byte_fifo::{whole_payload_key, ByteFifo, DedupKeyFn, PushCallback, UniqueByteFifo};
pub use handler::{BatchHandler, HandlerFn};

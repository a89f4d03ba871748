//! Disk-backed FIFO for forgeq.
//!
//! An append-only record log with a persisted read cursor implements
//! `ByteFifo`; a companion key op-log turns it into a `UniqueByteFifo`.
//! Recovery is crash-safe in the at-least-once sense: a torn tail is
//! truncated on open and a stale cursor replays items rather than losing
//! them.

mod log;
mod provider;
mod unique;

pub use log::DiskByteFifo;
pub use provider::DiskProvider;
pub use unique::DiskUniqueByteFifo;

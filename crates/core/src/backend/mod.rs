// Built-in backends
//
// Only the zero-dependency in-process channel lives in core; disk and Redis
// backends are infra crates wired in through the factory.

pub mod channel;

pub use channel::{ChannelByteFifo, ChannelUniqueByteFifo};

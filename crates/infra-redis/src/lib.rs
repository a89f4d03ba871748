//! Redis-backed FIFO for forgeq.
//!
//! A Redis list implements `ByteFifo`; pairing it with a membership set
//! gives the `UniqueByteFifo`. Items pushed here survive process restarts
//! and are visible to every process sharing the Redis instance.

mod connection;
mod fifo;
mod provider;
mod unique;

pub use connection::connect;
pub use fifo::RedisByteFifo;
pub use provider::RedisProvider;
pub use unique::RedisUniqueByteFifo;

// forgeq Core - Queue scheduling logic & ports
// NO backend-store dependencies (hexagonal architecture)

pub mod application;
pub mod backend;
pub mod domain;
pub mod error;
pub mod factory;
pub mod manager;
pub mod port;

pub use error::{QueueError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

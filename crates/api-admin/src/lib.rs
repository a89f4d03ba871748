//! JSON-RPC admin surface
//!
//! Exposes the queue manager's inspection and control operations over
//! JSON-RPC 2.0 on localhost, for the CLI and for operators with curl.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use server::{AdminServer, AdminServerConfig};

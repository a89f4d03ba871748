// Redis connection handling
//
// A single multiplexed ConnectionManager per queue: it reconnects on its
// own and is cheap to clone per operation, so no pool is needed.

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::info;

use forgeq_core::{QueueError, Result};

/// Open a managed connection to `conn_str` (e.g. `redis://127.0.0.1/`).
pub async fn connect(conn_str: &str) -> Result<ConnectionManager> {
    let client = Client::open(conn_str).map_err(to_backend)?;
    let manager = ConnectionManager::new(client).await.map_err(to_backend)?;
    // The URL may carry credentials, so it stays out of the logs.
    info!("connected to redis");
    Ok(manager)
}

pub(crate) fn to_backend(err: redis::RedisError) -> QueueError {
    QueueError::Backend(format!("redis: {err}"))
}

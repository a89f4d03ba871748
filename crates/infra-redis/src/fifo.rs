// Redis list as a ByteFifo
//
// RPUSH to append, LPOP to take the head. The list key is the queue name,
// shared with other processes pointed at the same Redis.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use forgeq_core::port::ByteFifo;
use forgeq_core::{QueueError, Result};

use crate::connection::to_backend;

pub struct RedisByteFifo {
    conn: ConnectionManager,
    list_key: String,
    closed: AtomicBool,
}

impl RedisByteFifo {
    pub fn new(conn: ConnectionManager, list_key: impl Into<String>) -> Self {
        Self {
            conn,
            list_key: list_key.into(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ByteFifo for RedisByteFifo {
    async fn push(&self, data: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Shutdown);
        }
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.list_key, data)
            .await
            .map_err(to_backend)
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.lpop::<_, Option<Vec<u8>>>(&self.list_key, None)
            .await
            .map_err(to_backend)
    }

    async fn len(&self) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.llen::<_, i64>(&self.list_key)
            .await
            .map_err(to_backend)
    }

    async fn close(&self) -> Result<()> {
        // The list stays in Redis for the next process; only local pushes
        // are refused.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

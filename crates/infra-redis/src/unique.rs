// Unique Redis FIFO - list plus membership set
//
// SADD answers atomically whether the key is new: 0 means a duplicate and
// the push is refused with the AlreadyInQueue sentinel. Pop takes from the
// list first and then clears the set entry, so the dedup window is exactly
// "still enqueued".

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use forgeq_core::port::{ByteFifo, DedupKeyFn, PushCallback, UniqueByteFifo};
use forgeq_core::{QueueError, Result};

use crate::connection::to_backend;

pub struct RedisUniqueByteFifo {
    conn: ConnectionManager,
    list_key: String,
    set_key: String,
    key_fn: DedupKeyFn,
    closed: AtomicBool,
}

impl RedisUniqueByteFifo {
    pub fn new(
        conn: ConnectionManager,
        list_key: impl Into<String>,
        set_key: impl Into<String>,
        key_fn: DedupKeyFn,
    ) -> Self {
        Self {
            conn,
            list_key: list_key.into(),
            set_key: set_key.into(),
            key_fn,
            closed: AtomicBool::new(false),
        }
    }

    async fn remove_key(&self, key: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(&self.set_key, key)
            .await
            .map_err(to_backend)
    }
}

#[async_trait]
impl ByteFifo for RedisUniqueByteFifo {
    async fn push(&self, data: Vec<u8>) -> Result<()> {
        self.push_if_absent(data, None).await
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let Some(data) = conn
            .lpop::<_, Option<Vec<u8>>>(&self.list_key, None)
            .await
            .map_err(to_backend)?
        else {
            return Ok(None);
        };
        let key = (self.key_fn)(&data);
        if let Err(err) = self.remove_key(&key).await {
            // The item already left the list and must still be delivered.
            // A dangling set entry only refuses re-pushes of this key
            // until it is cleared.
            warn!(error = %err, "failed to clear dedup key after pop");
        }
        Ok(Some(data))
    }

    async fn len(&self) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.llen::<_, i64>(&self.list_key)
            .await
            .map_err(to_backend)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl UniqueByteFifo for RedisUniqueByteFifo {
    async fn has(&self, data: &[u8]) -> Result<bool> {
        let key = (self.key_fn)(data);
        let mut conn = self.conn.clone();
        conn.sismember::<_, _, bool>(&self.set_key, key)
            .await
            .map_err(to_backend)
    }

    async fn push_if_absent(&self, data: Vec<u8>, callback: Option<PushCallback>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Shutdown);
        }
        let key = (self.key_fn)(&data);

        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(&self.set_key, key.as_slice())
            .await
            .map_err(to_backend)?;
        if added == 0 {
            return Err(QueueError::AlreadyInQueue);
        }

        if let Some(callback) = callback {
            if let Err(err) = callback.await {
                let _ = self.remove_key(&key).await;
                return Err(err);
            }
        }

        if let Err(err) = conn
            .rpush::<_, _, ()>(&self.list_key, data)
            .await
            .map_err(to_backend)
        {
            let _ = self.remove_key(&key).await;
            return Err(err);
        }
        Ok(())
    }
}

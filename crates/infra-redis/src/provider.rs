// FifoProvider wiring for the Redis backend
//
// One managed connection per queue, opened at queue creation. A queue's
// own conn_str wins over the provider's default URL.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use forgeq_core::domain::QueueSettings;
use forgeq_core::factory::FifoProvider;
use forgeq_core::port::{ByteFifo, DedupKeyFn, UniqueByteFifo};
use forgeq_core::{QueueError, Result};

use crate::connection::connect;
use crate::fifo::RedisByteFifo;
use crate::unique::RedisUniqueByteFifo;

pub struct RedisProvider {
    default_url: String,
}

impl RedisProvider {
    pub fn new(default_url: impl Into<String>) -> Self {
        Self {
            default_url: default_url.into(),
        }
    }

    async fn manager_for(&self, settings: &QueueSettings) -> Result<ConnectionManager> {
        let url = if settings.conn_str.is_empty() {
            &self.default_url
        } else {
            &settings.conn_str
        };
        if url.is_empty() {
            return Err(QueueError::Config(
                "redis backend selected but no connection string configured".into(),
            ));
        }
        connect(url).await
    }
}

#[async_trait]
impl FifoProvider for RedisProvider {
    async fn byte_fifo(
        &self,
        queue_name: &str,
        settings: &QueueSettings,
    ) -> Result<Arc<dyn ByteFifo>> {
        let conn = self.manager_for(settings).await?;
        Ok(Arc::new(RedisByteFifo::new(conn, queue_name)))
    }

    async fn unique_byte_fifo(
        &self,
        queue_name: &str,
        settings: &QueueSettings,
        key_fn: DedupKeyFn,
    ) -> Result<Arc<dyn UniqueByteFifo>> {
        let conn = self.manager_for(settings).await?;
        let set_key = if settings.set_name.is_empty() {
            format!("{queue_name}_unique")
        } else {
            settings.set_name.clone()
        };
        Ok(Arc::new(RedisUniqueByteFifo::new(
            conn, queue_name, set_key, key_fn,
        )))
    }
}

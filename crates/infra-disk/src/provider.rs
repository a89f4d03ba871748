// FifoProvider wiring for the disk backend

use std::sync::Arc;

use async_trait::async_trait;

use forgeq_core::domain::QueueSettings;
use forgeq_core::factory::FifoProvider;
use forgeq_core::port::{ByteFifo, DedupKeyFn, UniqueByteFifo};
use forgeq_core::Result;

use crate::log::DiskByteFifo;
use crate::unique::DiskUniqueByteFifo;

/// Builds disk FIFOs under `settings.data_dir`, one log per queue name.
pub struct DiskProvider;

#[async_trait]
impl FifoProvider for DiskProvider {
    async fn byte_fifo(
        &self,
        queue_name: &str,
        settings: &QueueSettings,
    ) -> Result<Arc<dyn ByteFifo>> {
        Ok(Arc::new(
            DiskByteFifo::open(&settings.data_dir, queue_name).await?,
        ))
    }

    async fn unique_byte_fifo(
        &self,
        queue_name: &str,
        settings: &QueueSettings,
        key_fn: DedupKeyFn,
    ) -> Result<Arc<dyn UniqueByteFifo>> {
        Ok(Arc::new(
            DiskUniqueByteFifo::open(&settings.data_dir, queue_name, key_fn).await?,
        ))
    }
}

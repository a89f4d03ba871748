//! RPC method handlers
//!
//! One method per manager operation. Reads are unthrottled; mutating
//! methods go through the rate limiter first.

use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::types::ErrorObjectOwned;
use tracing::info;

use forgeq_core::manager::Manager;

use crate::error::{throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    AddWorkersRequest, AddWorkersResponse, CancelWorkerRequest, CancelWorkerResponse,
    FlushRequest, FlushResponse, GetQueueRequest, GetQueueResponse, ListQueuesRequest,
    ListQueuesResponse, PauseRequest, PauseResponse, SetSettingsRequest, SetSettingsResponse,
};

/// Admin handler with injected dependencies
pub struct AdminHandler {
    manager: Arc<Manager>,
    rate_limiter: Arc<RateLimiter>,
}

impl AdminHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        // Default: 200 burst, 100 req/sec (configurable via env)
        let max_burst: u32 = std::env::var("FORGEQ_RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);

        let rate_per_sec: u32 = std::env::var("FORGEQ_RATE_LIMIT_RATE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        Self {
            manager,
            rate_limiter: Arc::new(RateLimiter::new(max_burst, rate_per_sec)),
        }
    }

    async fn throttle(&self) -> Result<(), ErrorObjectOwned> {
        if self.rate_limiter.check().await {
            Ok(())
        } else {
            Err(throttled())
        }
    }

    /// queue.list.v1
    pub async fn list(
        &self,
        _params: ListQueuesRequest,
    ) -> Result<ListQueuesResponse, ErrorObjectOwned> {
        Ok(ListQueuesResponse {
            queues: self.manager.list().await,
        })
    }

    /// queue.get.v1
    pub async fn get(&self, params: GetQueueRequest) -> Result<GetQueueResponse, ErrorObjectOwned> {
        let queue = self
            .manager
            .describe(params.qid)
            .await
            .map_err(to_rpc_error)?;
        Ok(GetQueueResponse { queue })
    }

    /// queue.set_settings.v1
    pub async fn set_settings(
        &self,
        params: SetSettingsRequest,
    ) -> Result<SetSettingsResponse, ErrorObjectOwned> {
        self.throttle().await?;
        self.manager
            .set_settings(params.qid, params.update)
            .await
            .map_err(to_rpc_error)?;
        info!(qid = params.qid, "queue settings updated via rpc");
        Ok(SetSettingsResponse {
            qid: params.qid,
            applied: true,
        })
    }

    /// queue.add_workers.v1
    pub async fn add_workers(
        &self,
        params: AddWorkersRequest,
    ) -> Result<AddWorkersResponse, ErrorObjectOwned> {
        self.throttle().await?;
        let base_workers = self
            .manager
            .add_workers(params.qid, params.count)
            .await
            .map_err(to_rpc_error)?;
        Ok(AddWorkersResponse {
            qid: params.qid,
            base_workers,
        })
    }

    /// queue.cancel_worker.v1
    pub async fn cancel_worker(
        &self,
        params: CancelWorkerRequest,
    ) -> Result<CancelWorkerResponse, ErrorObjectOwned> {
        self.throttle().await?;
        let cancelled = self
            .manager
            .cancel_worker(params.qid, params.pid)
            .await
            .map_err(to_rpc_error)?;
        info!(qid = params.qid, pid = params.pid, cancelled, "worker cancel requested via rpc");
        Ok(CancelWorkerResponse {
            qid: params.qid,
            pid: params.pid,
            cancelled,
        })
    }

    /// queue.flush.v1
    pub async fn flush(&self, params: FlushRequest) -> Result<FlushResponse, ErrorObjectOwned> {
        self.throttle().await?;
        self.manager
            .flush(params.qid, Duration::from_millis(params.timeout_ms))
            .await
            .map_err(to_rpc_error)?;
        Ok(FlushResponse {
            qid: params.qid,
            flushed: true,
        })
    }

    /// queue.pause.v1
    pub async fn pause(&self, params: PauseRequest) -> Result<PauseResponse, ErrorObjectOwned> {
        self.throttle().await?;
        self.manager.pause(params.qid).await.map_err(to_rpc_error)?;
        info!(qid = params.qid, "queue paused via rpc");
        Ok(PauseResponse {
            qid: params.qid,
            paused: true,
        })
    }

    /// queue.resume.v1
    pub async fn resume(&self, params: PauseRequest) -> Result<PauseResponse, ErrorObjectOwned> {
        self.throttle().await?;
        self.manager
            .resume(params.qid)
            .await
            .map_err(to_rpc_error)?;
        info!(qid = params.qid, "queue resumed via rpc");
        Ok(PauseResponse {
            qid: params.qid,
            paused: false,
        })
    }
}

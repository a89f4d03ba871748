//! JSON-RPC server
//!
//! Binds to localhost only; the admin surface carries no authentication of
//! its own and must never be exposed beyond the host.

use std::sync::Arc;

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use tracing::info;

use forgeq_core::manager::Manager;

use crate::handler::AdminHandler;
use crate::types::{
    AddWorkersRequest, CancelWorkerRequest, FlushRequest, GetQueueRequest, ListQueuesRequest,
    PauseRequest, SetSettingsRequest,
};

const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_PORT: u16 = 9538;

/// Admin server configuration
pub struct AdminServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ADMIN_HOST.to_string(),
            port: DEFAULT_ADMIN_PORT,
        }
    }
}

/// Admin server
pub struct AdminServer {
    config: AdminServerConfig,
    handler: Arc<AdminHandler>,
}

impl AdminServer {
    pub fn new(config: AdminServerConfig, manager: Arc<Manager>) -> Self {
        Self {
            config,
            handler: Arc::new(AdminHandler::new(manager)),
        }
    }

    /// Start the JSON-RPC server; the returned handle stops it.
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC admin server (localhost only)"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("queue.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ListQueuesRequest = params.parse().unwrap_or(ListQueuesRequest {});
                    handler.list(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: GetQueueRequest = params.parse()?;
                    handler.get(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.set_settings.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SetSettingsRequest = params.parse()?;
                    handler.set_settings(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.add_workers.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: AddWorkersRequest = params.parse()?;
                    handler.add_workers(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.cancel_worker.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: CancelWorkerRequest = params.parse()?;
                    handler.cancel_worker(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.flush.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: FlushRequest = params.parse()?;
                    handler.flush(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.pause.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: PauseRequest = params.parse()?;
                    handler.pause(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.resume.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: PauseRequest = params.parse()?;
                    handler.resume(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!("JSON-RPC admin server started successfully");

        let handle = server.start(module);
        Ok(handle)
    }
}

//! forgeq daemon - composition root
//!
//! Wires the backend providers, the queue manager and the admin server
//! together and hosts a default persistable queue. Real deployments embed
//! the crates directly; the daemon is the reference wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forgeq_api_admin::{AdminServer, AdminServerConfig};
use forgeq_core::application::worker::shutdown_channel;
use forgeq_core::domain::{BackendKind, QueueSettings, QueueType};
use forgeq_core::factory::QueueFactory;
use forgeq_core::manager::Manager;
use forgeq_core::port::HandlerFn;
use forgeq_infra_disk::DiskProvider;
use forgeq_infra_redis::RedisProvider;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DATA_DIR: &str = "data/queues";
const DEFAULT_QUEUE: &str = "default";

/// Seconds between the graceful-shutdown signal and the hard terminate.
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (JSON for production, pretty for development)
    let log_format = std::env::var("FORGEQ_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("forgeq=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("forgeq v{} starting...", VERSION);

    // 2. Load configuration
    let data_dir =
        std::env::var("FORGEQ_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    let redis_url = std::env::var("FORGEQ_REDIS_URL").unwrap_or_default();
    let admin_port: u16 = std::env::var("FORGEQ_ADMIN_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| AdminServerConfig::default().port);
    let grace_secs: u64 = std::env::var("FORGEQ_SHUTDOWN_GRACE_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS);

    // 3. Wire providers and the manager
    let mut factory = QueueFactory::new();
    factory.register_provider(BackendKind::Disk, Arc::new(DiskProvider));
    factory.register_provider(BackendKind::Redis, Arc::new(RedisProvider::new(redis_url.clone())));
    let manager = Arc::new(Manager::new());

    // 4. Create the default queue: persistable, disk-backed unless a Redis
    // URL is configured.
    let settings = QueueSettings {
        queue_type: QueueType::Persistable,
        conn_str: redis_url,
        data_dir: data_dir.into(),
        ..Default::default()
    };

    let handler = Arc::new(HandlerFn(|batch: Vec<serde_json::Value>| {
        for item in &batch {
            info!(%item, "processed item");
        }
        Vec::new()
    }));

    let (queue, qid) = factory
        .create_persistable_queue(&manager, DEFAULT_QUEUE, settings, handler)
        .await
        .map_err(|e| anyhow::anyhow!("default queue creation failed: {}", e))?;
    info!(qid, queue = DEFAULT_QUEUE, "default queue created");

    // 5. Start the queue's run loop
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let (terminate_tx, terminate_rx) = shutdown_channel();

    let run_queue = queue.clone();
    let mut run_handle = tokio::spawn(async move {
        if let Err(e) = run_queue.run(shutdown_rx, terminate_rx).await {
            error!(error = ?e, "queue run loop failed");
        }
    });

    // 6. Start the admin server
    info!("Starting admin server...");
    let admin_config = AdminServerConfig {
        port: admin_port,
        ..Default::default()
    };
    let admin_handle = AdminServer::new(admin_config, manager.clone())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("admin server start failed: {}", e))?;

    info!("System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Two-phase shutdown: stop dispatching, give in-flight work a grace
    // period, then hard-terminate whatever is left.
    shutdown_tx.shutdown();
    tokio::select! {
        _ = &mut run_handle => {}
        _ = tokio::time::sleep(Duration::from_secs(grace_secs)) => {
            info!("grace period expired, terminating remaining workers");
            terminate_tx.shutdown();
            // run() still persists the channel remainder after terminate.
            let _ = tokio::time::timeout(Duration::from_secs(grace_secs), &mut run_handle).await;
        }
    }

    admin_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("admin server stop failed: {}", e))?;
    manager.shutdown_all(Duration::from_secs(2)).await;

    info!("Shutdown complete.");

    Ok(())
}

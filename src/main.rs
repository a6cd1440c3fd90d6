//! Bridge Orchestrator daemon
//!
//! Hosts the durable transaction history, resumes polling for bridge
//! transfers that were in flight at the last shutdown, and serves the HTTP
//! API and Prometheus metrics.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use bridge_orchestrator::backend::HttpBridgeClient;
use bridge_orchestrator::config::Settings;
use bridge_orchestrator::metrics::MetricsServer;
use bridge_orchestrator::state::HistoryStore;
use bridge_orchestrator::{api, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!(
        "Starting Bridge Orchestrator v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Open the transaction history store
    let db_path = Path::new(&settings.storage.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create storage directory {:?}", parent))?;
    }
    let history = Arc::new(HistoryStore::open(db_path).await?);
    info!("Transaction history store ready at {:?}", db_path);

    // Resume polling for transfers that were in flight at last shutdown
    let bridge = Arc::new(HttpBridgeClient::new(&settings.bridge.base_url)?);
    let resumed = history
        .resume_pending(
            bridge.clone(),
            Duration::from_secs(settings.orchestrator.history_poll_secs),
        )
        .await?;
    info!(resumed, "Pending transfer polling resumed");

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let history = history.clone();
        async move {
            if let Err(e) = api::run_server(config, history).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Retention pruning loop
    let prune_handle = tokio::spawn({
        let history = history.clone();
        let interval = Duration::from_secs(settings.storage.prune_interval_secs);
        let retention = chrono::Duration::days(settings.storage.retention_days);
        async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = history.prune(retention).await {
                    warn!("History pruning failed: {}", e);
                }
                metrics::set_active_pollers(history.active_pollers());
            }
        }
    });

    info!("Bridge Orchestrator is running");
    info!(
        "API server: http://{}:{}",
        settings.api.host, settings.api.port
    );
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown: wind down background pollers before dropping the pool
    history.stop_pollers().await;

    api_handle.abort();
    prune_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Orchestrator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_orchestrator=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! Docflow Daemon - Main Entry Point
//!
//! Composition root: settings, logging, SQLite store, source connectors,
//! subprocess processor, crash recovery and the JSON-RPC server.

mod logging;
mod settings;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use docflow_api_rpc::RpcServer;
use docflow_core::application::{EngineContext, JobManager, RecoveryService, StatusBus};
use docflow_core::domain::SourceKind;
use docflow_core::port::{ConnectorRegistry, SystemTimeProvider, UuidProvider};
use docflow_infra_sqlite::SqliteStore;
use docflow_infra_system::{FolderConnector, SubprocessProcessor};
use settings::DaemonSettings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Settings and logging
    let settings = DaemonSettings::load()?;
    let _log_guard = logging::init(&settings.logging)?;

    info!("Docflow daemon v{} starting...", VERSION);

    // 2. Store
    let db_dir = settings
        .database
        .file_path()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .filter(|d| !d.as_os_str().is_empty());
    if let Some(parent) = db_dir {
        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(url = %settings.database.url, "Opening database");
    let store = Arc::new(
        SqliteStore::open(&settings.database.url)
            .await
            .context("Failed to open the database")?,
    );

    // 3. Adapters (DI wiring)
    let connectors = ConnectorRegistry::new()
        .register(SourceKind::Folder, Arc::new(FolderConnector::new()));
    let processor = SubprocessProcessor::new(settings.processor.clone());
    info!(command = %settings.processor.command, "Processing unit configured");

    let ctx = Arc::new(EngineContext {
        store: store.clone(),
        connector: Arc::new(connectors),
        processor: Arc::new(processor),
        time: Arc::new(SystemTimeProvider),
        ids: Arc::new(UuidProvider),
        bus: StatusBus::new(settings.engine.status_buffer),
        settings: settings.engine.clone(),
    });
    let manager = Arc::new(JobManager::new(ctx));

    // 4. Crash recovery before accepting requests
    RecoveryService::new(manager.clone())
        .recover()
        .await
        .context("Startup recovery failed")?;

    // 5. JSON-RPC server
    let (addr, rpc_handle) = RpcServer::new(settings.rpc.clone(), manager.clone())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready");

    // 6. Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown: stop accepting calls, let in-flight documents finish.
    // Jobs stay `running` and resume on the next start.
    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server already stopped");
    }
    manager.shutdown().await;
    rpc_handle.stopped().await;
    store.close().await;
    telemetry::shutdown();

    info!("Shutdown complete.");
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

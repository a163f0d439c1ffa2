mod config;
mod error;
mod route;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pipeline::{Collector, CollectorOptions, DockerMonitor, FsLogStorage, LogService};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{LogFormat, ProxyConfig};
use crate::route::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Phase 1: Basic tracing so we can log during config loading
    let _basic_tracing = init_tracing_basic();

    info!("Starting log proxy v{}", env!("CARGO_PKG_VERSION"));

    let config = ProxyConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    // Phase 2: Re-initialize tracing with config (format, level)
    drop(_basic_tracing);
    init_tracing_from_config(&config);

    info!("Configuration loaded successfully");

    let storage = Arc::new(FsLogStorage::new(&config.storage.log_dir));
    let restored = storage
        .load_existing_mappings()
        .await
        .context("Failed to load existing log mappings")?;
    info!(log_dir = %config.storage.log_dir, containers = restored, "Log storage ready");

    let monitor = Arc::new(
        DockerMonitor::new(&config.docker.socket).context("Failed to connect to Docker")?,
    );

    let collector = Collector::new(
        monitor.clone(),
        storage.clone(),
        CollectorOptions {
            containers: config.collector.containers.clone(),
        },
    );
    let logs = Arc::new(LogService::new(monitor, storage));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let collector_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            info!("Start collecting logs");
            let result = collector.run(shutdown.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "Log collector failed");
                shutdown.cancel();
            }
            result
        }
    });

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let app = route::router(AppState {
        logs,
        shutdown: shutdown.clone(),
    });

    info!("Listening on: http://{}", addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .into_future();
    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    let server = async move {
        tokio::select! {
            result = server => result.context("Server error"),
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!(timeout_secs = drain_timeout.as_secs(), "Server did not drain in time");
                Ok(())
            }
        }
    };
    let served = server.await;

    let collected = collector_task.await.context("Log collector task panicked")?;
    served?;
    collected.context("Log collector run")?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Phase 1: Initialize basic tracing before config is loaded.
/// Uses `set_default` (thread-local) so it can be replaced by Phase 2.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,proxy=debug,pipeline=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: Re-initialize tracing with configuration values.
fn init_tracing_from_config(config: &ProxyConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Prefer RUST_LOG env var, fall back to config level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

//! Observer consensus server - main entry point

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use observer_consensus::{build_router, AppState, ServiceConfig};

/// Command-line arguments for consensus-server
#[derive(Parser, Debug)]
#[command(name = "consensus-server")]
#[command(about = "Multi-observer position validation service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CONSENSUS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "CONSENSUS_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CONSENSUS_PORT")]
    port: Option<u16>,

    /// Validation deadline in milliseconds
    #[arg(long, env = "CONSENSUS_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// Minimum observers for a valid position
    #[arg(long, env = "CONSENSUS_MIN_OBSERVERS")]
    min_observers: Option<usize>,

    /// Confidence required for a valid position
    #[arg(long, env = "CONSENSUS_CONFIDENCE_THRESHOLD")]
    confidence_threshold: Option<f64>,
}

impl Args {
    /// Overlay flags on the file (or default) configuration
    fn into_config(self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => ServiceConfig::default(),
        };

        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.server.request_timeout_ms = timeout;
        }
        if let Some(min_observers) = self.min_observers {
            config.scoring.min_observers = min_observers;
        }
        if let Some(threshold) = self.confidence_threshold {
            config.scoring.confidence_threshold = threshold;
        }

        config.ensure_valid().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "observer_consensus=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config()?;

    info!(
        shards = config.store.shard_count,
        timeout_ms = config.server.request_timeout_ms,
        min_observers = config.scoring.min_observers,
        threshold = config.scoring.confidence_threshold,
        "Starting observer consensus service"
    );

    let state = AppState::new(&config);
    let service = state.service.clone();
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("\n{}", service.performance_report());
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gatehouse::config::GatehouseConfig;
use gatehouse::http::{GateState, HttpServer};
use gatehouse::ratelimit::{Gate, PolicyTable, SystemClock, WindowStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Fixed-window request-rate gate.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Path to a YAML policy file, overrides the configuration file
    #[arg(short, long)]
    policies: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_thread_ids(true))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Gatehouse rate gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatehouseConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    let policy_path = cli
        .policies
        .or_else(|| config.rate_limiting.policy_path.as_ref().map(PathBuf::from));
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let policies = match &policy_path {
        Some(path) => PolicyTable::from_file(path)?,
        None => {
            info!("No policy file configured, using built-in policies");
            PolicyTable::builtin()?
        }
    };

    let sweep_interval = config.rate_limiting.sweep_interval_ms;
    let store = Arc::new(WindowStore::with_sweep_interval(sweep_interval));
    let gate = Gate::new(store, Arc::new(SystemClock));
    let state = Arc::new(GateState::new(gate, policies));
    info!(
        policies = state.policy_count(),
        sweep_interval_ms = sweep_interval,
        "Rate gate initialized"
    );

    let sweeper = state.spawn_sweeper(Duration::from_millis(sweep_interval));
    let reloader = match (&policy_path, config.rate_limiting.policy_reload_interval_secs) {
        (Some(path), secs) if secs > 0 => {
            Some(state.spawn_policy_reloader(path.clone(), Duration::from_secs(secs)))
        }
        _ => None,
    };

    HttpServer::new(config.server.listen_addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    if let Some(reloader) = reloader {
        reloader.abort();
    }

    info!("Gatehouse rate gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

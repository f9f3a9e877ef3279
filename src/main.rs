use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rustls::crypto::{ring, CryptoProvider};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use protect_live::config::AppConfig;
use protect_live::monitor::spawn_memory_monitor;
use protect_live::protect::HttpConnector;
use protect_live::state::AppState;
use protect_live::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// protect-live command line arguments
#[derive(Parser, Debug)]
#[command(name = "protect-live")]
#[command(version, about = "Browser live viewer for UniFi Protect NVRs", long_about = None)]
struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_json);

    // rustls 0.23 needs a process default for reqwest and tungstenite
    if CryptoProvider::install_default(ring::default_provider()).is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!(
        "Starting protect-live v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATE")
    );

    let config = load_config(&args)?;
    tracing::debug!(config = ?config, "Effective configuration");
    match &config.protect.base_url {
        Some(base_url) => tracing::info!("Default NVR: {}", base_url),
        None => tracing::info!("No default NVR configured, the viewer will ask for one"),
    }

    let bind_addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.web.bind_address, config.web.http_port
            )
        })?;

    let state = AppState::new(config, Arc::new(HttpConnector));

    state.spawn_session_sweeper();
    if state.config.monitor.enabled {
        spawn_memory_monitor(
            Duration::from_secs(state.config.monitor.interval_secs.max(1)),
            state.shutdown_signal(),
        );
    }

    let app = web::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_tx = state.shutdown_tx.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    tokio::select! {
        _ = shutdown_signal => {
            cleanup(&state).await;
        }
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
            cleanup(&state).await;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Defaults < config file < environment < command line
fn load_config(args: &CliArgs) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    config.apply_env();

    if let Some(address) = &args.address {
        config.web.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.web.http_port = port;
    }

    Ok(config)
}

fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "protect_live=error,tower_http=error",
        LogLevel::Warn => "protect_live=warn,tower_http=warn",
        LogLevel::Info => "protect_live=info,tower_http=info",
        LogLevel::Verbose => "protect_live=debug,tower_http=info",
        LogLevel::Debug => "protect_live=debug,tower_http=debug",
        LogLevel::Trace => "protect_live=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Stop live streams and log out of every NVR
async fn cleanup(state: &Arc<AppState>) {
    let _ = state.shutdown_tx.send(());

    state.streams.stop_all().await;
    tracing::info!("Live streams stopped");

    state.connections.dispose_all().await;
    tracing::info!("NVR connections closed");
}

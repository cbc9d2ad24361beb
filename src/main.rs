//! rpcgate - allowlisting gateway for JSON-RPC endpoints.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use rpcgate::config::{DEFAULT_CONFIG_PATH, load_settings};
use rpcgate::transport::{GatewayHandler, GatewayServer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (settings, validation) = match load_settings(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "Failed to load configuration");
            return Ok(ExitCode::FAILURE);
        }
    };

    for warning in &validation.warnings {
        warn!(warning = %warning, "Configuration warning");
    }

    let settings = Arc::new(settings);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        listen = %settings.listen,
        upstream = %settings.upstream.url,
        upstream_auth = settings.upstream.credentials.is_some(),
        upstream_timeout_secs = settings.upstream.timeout.as_secs_f64(),
        inbound_auth = settings.inbound_auth_enabled(),
        allowed_methods = ?settings.allowed_methods.sorted(),
        max_body_size = settings.max_body_size,
        "rpcgate starting"
    );

    let handler = match GatewayHandler::new(settings.clone()) {
        Ok(handler) => handler,
        Err(e) => {
            error!(error = %e, "Failed to create upstream client");
            return Ok(ExitCode::FAILURE);
        }
    };

    let server = GatewayServer::new(handler);
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!(listen = %settings.listen, error = %e, "Failed to bind listen address");
            return Ok(ExitCode::FAILURE);
        }
    };

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    server.serve(listener, shutdown).await?;

    Ok(ExitCode::SUCCESS)
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
            }
        }
    });

    #[cfg(not(unix))]
    drop(shutdown);
}

//! Jinglecast Server - broadcast coordinator for Jinglecast.
//!
//! Serves the operator commands over HTTP, accepts playback endpoints over
//! WebSocket and optionally plays on this machine as a local endpoint.

mod config;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use jinglecast_core::{bind, bootstrap_services, start_server, AplayOutput, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Jinglecast Server - plays chat jingles on groups of endpoints in sync.
#[derive(Parser, Debug)]
#[command(name = "jinglecast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "JINGLECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "JINGLECAST_BIND_PORT")]
    port: Option<u16>,

    /// Data directory for `chats.json`.
    #[arg(short = 'd', long, env = "JINGLECAST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Group token to also play on this machine (overrides config file).
    #[arg(long, env = "JINGLECAST_LOCAL_TOKEN")]
    local_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Jinglecast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }
    if let Some(token) = args.local_token {
        config.local_endpoint_token = Some(token);
    }

    let core_config = config.to_core_config()?;
    log::info!(
        "Configuration: bind_port={}, data_dir={:?}, local_endpoint={:?}",
        core_config.bind_port,
        core_config.data_dir,
        core_config.local_endpoint.as_ref().map(|g| g.as_str()),
    );

    if core_config.local_endpoint.is_some() {
        let output = AplayOutput::new(
            core_config.audio.aplay_path.clone(),
            core_config.audio.audio_device.clone(),
        );
        if let Err(e) = output.probe().await {
            log::error!("aplay is not usable: {}", e);
            bail!(
                "The local endpoint needs aplay. \
                 Install it with: apt-get install alsa-base alsa-utils"
            );
        }
    }

    // Bind before any background task starts
    let listener = bind(core_config.bind_port)
        .await
        .with_context(|| format!("Failed to bind port {}", core_config.bind_port))?;

    let services = bootstrap_services(core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::builder()
        .commands(services.commands.clone())
        .hub(services.hub.clone())
        .event_bridge(services.event_bridge.clone())
        .config(services.config.clone())
        .build()?;

    let server_shutdown = services.cancel_token.child_token();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(listener, app_state, server_shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown; cancelling the token also stops the HTTP server
    services.shutdown();

    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

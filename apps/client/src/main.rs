//! Jinglecast Client - playback endpoint for Jinglecast.
//!
//! Joins one group on the coordinator and plays every broadcast sent to it
//! through `aplay`.

mod connection;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use jinglecast_core::{
    AplayOutput, BroadcastTimeouts, EndpointSession, GroupId, SingleFlightPlayer, TokioSpawner,
};
use tokio_util::sync::CancellationToken;

use crate::connection::EndpointClient;

/// Jinglecast Client - plays jingles broadcast to a group.
#[derive(Parser, Debug)]
#[command(name = "jinglecast-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator address, e.g. `ws://host:4000`.
    #[arg(short, long, env = "JINGLECAST_SERVER")]
    server: String,

    /// Group token. Send /token in the chat to get one.
    #[arg(short, long, env = "JINGLECAST_TOKEN")]
    token: String,

    /// ALSA device passed to `aplay -D`.
    #[arg(short = 'D', long)]
    device: Option<String>,

    /// Path to the aplay binary.
    #[arg(long, default_value = "aplay")]
    aplay_path: PathBuf,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "JINGLECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Jinglecast Client v{}", env!("CARGO_PKG_VERSION"));

    let token = match GroupId::parse(&args.token) {
        Ok(token) => token,
        Err(e) => bail!(
            "{e}. Pass a token like --token=ABC45. \
             You can get a token by sending /token in the chat."
        ),
    };

    let output = AplayOutput::new(args.aplay_path, args.device);
    if let Err(e) = output.probe().await {
        log::error!("aplay is not usable: {}", e);
        bail!("Install aplay first: apt-get install alsa-base alsa-utils");
    }

    let session = Arc::new(EndpointSession::new(
        Arc::new(SingleFlightPlayer::new(Arc::new(output))),
        BroadcastTimeouts::default().prepare_window(),
        TokioSpawner::current(),
    ));
    let client = EndpointClient::new(&args.server, &token, session);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        log::info!("Shutdown signal received");
        signal_token.cancel();
    });

    client.run(shutdown).await;

    log::info!("Shutdown complete");
    Ok(())
}

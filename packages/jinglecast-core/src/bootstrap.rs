//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. The server binary calls
//! [`bootstrap_services`]; tests swap the audio adapters through
//! [`bootstrap_services_with_audio`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::audio::{AplayOutput, AudioOutput, AudioSource, FfmpegSource};
use crate::error::{JingleError, JingleResult};
use crate::events::{BroadcastEvent, BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::player::SingleFlightPlayer;
use crate::protocol::EndpointId;
use crate::protocol_constants::{HTTP_CONNECT_TIMEOUT_SECS, HTTP_READ_TIMEOUT_SECS};
use crate::runtime::TokioSpawner;
use crate::services::{
    spawn_heartbeat, spawn_local_endpoint, BroadcastCoordinator, CommandService,
    EndpointSession, PlaybackScheduler,
};
use crate::state::Config;
use crate::store::ChatStore;
use crate::transport::{EndpointHub, GroupTransport};

/// Container for all bootstrapped services.
///
/// Consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Validated configuration.
    pub config: Arc<Config>,
    /// Persisted chat records.
    pub store: Arc<ChatStore>,
    /// Registry of connected endpoints.
    pub hub: Arc<EndpointHub>,
    /// Per-group broadcast queues.
    pub scheduler: Arc<PlaybackScheduler>,
    /// Operator commands.
    pub commands: Arc<CommandService>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Event bridge feeding SSE subscribers and optional external consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Id of the co-located endpoint, if one was configured.
    pub local_endpoint: Option<EndpointId>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Initiates graceful shutdown of all services.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Stops heartbeat and the local endpoint
        self.cancel_token.cancel();

        self.scheduler.shutdown();

        let closed = self.hub.close_all();
        log::info!("[Bootstrap] Closed {} endpoint connection(s)", closed);

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for downloads and heartbeats.
fn create_http_client() -> JingleResult<Client> {
    http_client_with(
        Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
        Duration::from_secs(HTTP_READ_TIMEOUT_SECS),
    )
}

/// No total timeout: a slow download runs as long as each read makes progress.
fn http_client_with(connect: Duration, read: Duration) -> JingleResult<Client> {
    Client::builder()
        .connect_timeout(connect)
        .read_timeout(read)
        .build()
        .map_err(|e| JingleError::Internal(format!("Failed to create HTTP client: {e}")))
}

/// Bootstraps all services with the ffmpeg source and the aplay output.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the data directory
/// cannot be loaded or the HTTP client cannot be built.
pub fn bootstrap_services(config: Config) -> JingleResult<BootstrappedServices> {
    let http_client = create_http_client()?;
    let source = Arc::new(FfmpegSource::new(http_client.clone(), &config.audio));
    let output = Arc::new(AplayOutput::new(
        config.audio.aplay_path.clone(),
        config.audio.audio_device.clone(),
    ));
    bootstrap_with_client(config, http_client, source, output)
}

/// Bootstraps all services with the given audio adapters.
///
/// `output` is only used when a local endpoint is configured.
///
/// # Errors
///
/// Same as [`bootstrap_services`].
pub fn bootstrap_services_with_audio(
    config: Config,
    source: Arc<dyn AudioSource>,
    output: Arc<dyn AudioOutput>,
) -> JingleResult<BootstrappedServices> {
    bootstrap_with_client(config, create_http_client()?, source, output)
}

/// The wiring order follows the dependencies:
///
/// 1. Shared infrastructure (broadcast channel, event bridge, cancellation token)
/// 2. Chat store (loads `chats.json`)
/// 3. Endpoint hub (depends on event bridge)
/// 4. Coordinator and scheduler (depend on hub, event bridge)
/// 5. Command service (depends on store, source, scheduler)
/// 6. Background tasks: local endpoint and heartbeat
fn bootstrap_with_client(
    config: Config,
    http_client: Client,
    source: Arc<dyn AudioSource>,
    output: Arc<dyn AudioOutput>,
) -> JingleResult<BootstrappedServices> {
    config
        .validate()
        .map_err(|e| JingleError::Internal(format!("Invalid configuration: {e}")))?;
    let config = Arc::new(config);

    let spawner = TokioSpawner::current();
    let (broadcast_tx, _) = broadcast::channel::<BroadcastEvent>(config.event_channel_capacity);
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx.clone()));
    if log::log_enabled!(log::Level::Debug) {
        event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));
    }
    let cancel_token = CancellationToken::new();

    let store = Arc::new(match &config.data_dir {
        Some(dir) => ChatStore::open(dir)?,
        None => {
            log::warn!("[Bootstrap] No data directory configured, tokens are kept in memory only");
            ChatStore::in_memory()
        }
    });

    let hub = Arc::new(EndpointHub::new(
        config.outbound_queue_capacity,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));

    let coordinator = Arc::new(BroadcastCoordinator::new(
        Arc::clone(&hub) as Arc<dyn GroupTransport>,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.timeouts,
    ));
    let scheduler = Arc::new(PlaybackScheduler::new(
        coordinator,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner.clone(),
    ));

    let commands = Arc::new(CommandService::new(
        Arc::clone(&config),
        Arc::clone(&store),
        source,
        Arc::clone(&scheduler),
    ));

    let local_endpoint = config.local_endpoint.clone().map(|group| {
        let session = Arc::new(EndpointSession::new(
            Arc::new(SingleFlightPlayer::new(output)),
            config.timeouts.prepare_window(),
            spawner.clone(),
        ));
        spawn_local_endpoint(&hub, group, session, &spawner, cancel_token.clone())
    });

    spawn_heartbeat(
        &config.heartbeat,
        http_client.clone(),
        &spawner,
        cancel_token.clone(),
    );

    Ok(BootstrappedServices {
        config,
        store,
        hub,
        scheduler,
        commands,
        broadcast_tx,
        event_bridge,
        local_endpoint,
        http_client,
        spawner,
        cancel_token,
    })
}

//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::events::BroadcastEventBridge;
use crate::services::CommandService;
use crate::state::Config;
use crate::transport::EndpointHub;

pub mod http;
pub mod response;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// A required component was not handed to the [`AppStateBuilder`].
    #[error("{0} is required")]
    MissingComponent(&'static str),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Operator commands.
    pub commands: Arc<CommandService>,
    /// Registry of connected endpoints.
    pub hub: Arc<EndpointHub>,
    /// Event bridge feeding the SSE stream.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Ends long-lived responses (SSE) when the server shuts down.
    pub shutdown: CancellationToken,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    commands: Option<Arc<CommandService>>,
    hub: Option<Arc<EndpointHub>>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(mut self, commands: Arc<CommandService>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn hub(mut self, hub: Arc<EndpointHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingComponent`] naming the first unset field.
    pub fn build(self) -> Result<AppState, ServerError> {
        Ok(AppState {
            commands: self
                .commands
                .ok_or(ServerError::MissingComponent("commands"))?,
            hub: self.hub.ok_or(ServerError::MissingComponent("hub"))?,
            event_bridge: self
                .event_bridge
                .ok_or(ServerError::MissingComponent("event_bridge"))?,
            config: self.config.ok_or(ServerError::MissingComponent("config"))?,
            shutdown: CancellationToken::new(),
        })
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Binds the configured port on all interfaces.
///
/// # Errors
///
/// Fails if the port is taken or not permitted.
pub async fn bind(port: u16) -> Result<TcpListener, ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    Ok(TcpListener::bind(&addr).await?)
}

/// Serves the API on `listener` until `shutdown` fires.
///
/// # Errors
///
/// Fails if accepting connections fails.
pub async fn start_server(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Server listening on http://{}", addr);
    }
    let state = AppState { shutdown: shutdown.clone(), ..state };
    let app = http::create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

//! Jinglecast Core - shared library for Jinglecast.
//!
//! This crate provides the core functionality for Jinglecast, a coordinator
//! that plays short audio clips on groups of remote playback endpoints at the
//! same moment. It is used by both the coordinator server and the standalone
//! playback client.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`protocol`]: Identifiers, commands and the endpoint wire codec
//! - [`transport`]: Endpoint registry and acknowledgement collection
//! - [`services`]: Broadcast coordination, per-group scheduling, endpoint sessions
//! - [`player`]: Single-flight playback on one endpoint
//! - [`queue`]: Cancellable FIFO request queue
//! - [`audio`]: PCM conversion (ffmpeg) and playback (aplay)
//! - [`store`]: Persisted chat tokens and jingles
//! - [`api`]: HTTP, SSE and WebSocket surface
//! - [`events`]: Event system for real-time observers
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from platform-specific
//! implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`GroupTransport`](transport::GroupTransport): Fanning requests out to a group
//! - [`AudioSource`](audio::AudioSource) / [`AudioOutput`](audio::AudioOutput): Audio tools

// Allow missing docs for now during migration - will be cleaned up later
#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod operation;
pub mod player;
pub mod protocol;
pub mod protocol_constants;
pub mod queue;
pub mod runtime;
pub mod services;
pub mod state;
pub mod store;
pub mod transport;
pub mod utils;

// Re-export commonly used types at the crate root
pub use audio::{AplayOutput, AudioOutput, AudioRef, AudioSource, FfmpegSource};
pub use error::{ErrorCode, JingleError, JingleResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EndpointEvent, EventEmitter, LoggingEventEmitter,
    PlaybackEvent,
};
pub use operation::{CancelSignal, Operation, OperationSlot};
pub use player::SingleFlightPlayer;
pub use protocol::{Command, EndpointId, EventId, GroupId};
pub use queue::{QueueError, RequestQueue, TaskHandle};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{AudioToolsConfig, BroadcastTimeouts, Config, HeartbeatConfig};
pub use store::ChatStore;
pub use transport::{EndpointHub, GroupTransport};
pub use utils::{now_millis, parse_chat_list};

// Re-export service types
pub use services::{
    AckReply, BroadcastCoordinator, BroadcastOutcome, BroadcastReport, BroadcastRequest,
    CommandService, EndpointSession, PlaybackScheduler,
};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_services_with_audio, BootstrappedServices};

// Re-export API types
pub use api::{bind, start_server, AppState, AppStateBuilder, ServerError};

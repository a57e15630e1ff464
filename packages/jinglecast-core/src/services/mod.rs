//! Application services layer.
//!
//! Business logic between the API layer and the transport/audio adapters:
//! broadcast orchestration, per-group scheduling, operator commands and the
//! endpoint side of the protocol.

pub mod commands;
pub mod coordinator;
pub mod endpoint;
pub mod heartbeat;
pub mod local_endpoint;
pub mod scheduler;

pub use commands::{CommandService, MessageReply, PlayReply, StopReply, TokenReply};
pub use coordinator::{
    BroadcastCoordinator, BroadcastOutcome, BroadcastReport, BroadcastRequest, StopOutcome,
    StopReport,
};
pub use endpoint::{AckReply, EndpointSession};
pub use heartbeat::{send_heartbeat, spawn_heartbeat};
pub use local_endpoint::spawn_local_endpoint;
pub use scheduler::{BroadcastHandle, PlaybackScheduler};

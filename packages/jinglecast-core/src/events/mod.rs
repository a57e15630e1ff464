//! Event system for observers of the coordinator.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for fanning events out to SSE subscribers
//! - Event types for broadcast progress and endpoint presence

mod bridge;
pub(crate) mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::protocol::{EndpointId, EventId, GroupId};

/// Events published to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Progress of broadcasts and stops.
    Playback(PlaybackEvent),

    /// Endpoints joining or leaving groups.
    Endpoint(EndpointEvent),
}

/// Progress of a broadcast through its phases.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// A broadcast was accepted and is waiting in its group's queue.
    Queued {
        #[serde(rename = "eventId")]
        event_id: EventId,
        group: GroupId,
        timestamp: u64,
    },
    /// PREPARE was sent to the resolved endpoints.
    Started {
        #[serde(rename = "eventId")]
        event_id: EventId,
        group: GroupId,
        resolved: usize,
        /// Audio length in milliseconds.
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        timestamp: u64,
    },
    /// The prepare phase ended.
    Prepared {
        #[serde(rename = "eventId")]
        event_id: EventId,
        resolved: usize,
        prepared: usize,
        timestamp: u64,
    },
    /// The broadcast finished (or was interrupted).
    Completed {
        #[serde(rename = "eventId")]
        event_id: EventId,
        resolved: usize,
        prepared: usize,
        played: usize,
        interrupted: bool,
        timestamp: u64,
    },
    /// A stop was fanned out to a group.
    Stopped {
        group: GroupId,
        resolved: usize,
        confirmed: usize,
        timestamp: u64,
    },
}

/// Endpoint presence changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EndpointEvent {
    Connected {
        #[serde(rename = "endpointId")]
        endpoint_id: EndpointId,
        group: GroupId,
        timestamp: u64,
    },
    Disconnected {
        #[serde(rename = "endpointId")]
        endpoint_id: EndpointId,
        group: GroupId,
        timestamp: u64,
    },
}

impl From<PlaybackEvent> for BroadcastEvent {
    fn from(event: PlaybackEvent) -> Self {
        BroadcastEvent::Playback(event)
    }
}

impl From<EndpointEvent> for BroadcastEvent {
    fn from(event: EndpointEvent) -> Self {
        BroadcastEvent::Endpoint(event)
    }
}

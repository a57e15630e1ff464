//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative delivery.

use super::{EndpointEvent, PlaybackEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a broadcast progress event.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits an endpoint presence event.
    fn emit_endpoint(&self, event: EndpointEvent);
}

/// No-op emitter for tests and embedded endpoints.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_playback(&self, _event: PlaybackEvent) {}

    fn emit_endpoint(&self, _event: EndpointEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback_event");
    }

    fn emit_endpoint(&self, event: EndpointEvent) {
        tracing::debug!(?event, "endpoint_event");
    }
}

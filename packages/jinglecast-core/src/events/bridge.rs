//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and the SSE endpoint, mapping typed events onto a broadcast channel.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, EndpointEvent, PlaybackEvent};

/// Bridges domain events to the observer broadcast channel.
///
/// Events are additionally forwarded to an optional secondary emitter (the
/// server sets a [`LoggingEventEmitter`](super::LoggingEventEmitter) at debug
/// level).
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self::with_sender(tx)
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<BroadcastEvent>) -> Self {
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets a secondary emitter that receives a copy of every event.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_playback, PlaybackEvent, Playback);
    impl_emit!(emit_endpoint, EndpointEvent, Endpoint);
}

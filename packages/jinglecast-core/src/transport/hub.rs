//! Endpoint registry and request/ack correlation.
//!
//! Every connected endpoint (remote WebSocket or in-process) registers here
//! with the group it joined and gets a bounded queue of outbound requests.
//! Acknowledgments come back through [`EndpointHub::resolve_ack`] keyed by
//! the transport-level request id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{collect_acks, AckCollection, GroupTransport};
use crate::events::{EndpointEvent, EventEmitter};
use crate::protocol::{Command, EndpointId, GroupId};
use crate::utils::now_millis;

/// A command addressed to one endpoint, tagged for ack correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub request_id: u64,
    pub command: Command,
}

struct EndpointLink {
    group: GroupId,
    tx: mpsc::Sender<OutboundRequest>,
}

struct PendingAck {
    endpoint: EndpointId,
    tx: oneshot::Sender<bool>,
}

/// Registry of connected endpoints.
///
/// Thread-safe and designed for concurrent access from multiple connection
/// handlers. Uses hierarchical cancellation tokens for force-closing every
/// connection at shutdown.
pub struct EndpointHub {
    connections: DashMap<EndpointId, EndpointLink>,
    pending: DashMap<u64, PendingAck>,
    next_connection_id: AtomicU64,
    next_request_id: AtomicU64,
    /// Wrapped in RwLock so it can be replaced after close_all().
    global_cancel: RwLock<CancellationToken>,
    outbound_capacity: usize,
    emitter: Arc<dyn EventEmitter>,
}

impl EndpointHub {
    pub fn new(outbound_capacity: usize, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            connections: DashMap::new(),
            pending: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            next_request_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
            outbound_capacity,
            emitter,
        }
    }

    /// Registers an endpoint in `group`.
    ///
    /// The id is `<prefix>-<n>`. Returns the guard that unregisters the
    /// endpoint on drop and the receiver of requests addressed to it.
    pub fn register(
        self: &Arc<Self>,
        group: GroupId,
        prefix: &str,
    ) -> (ConnectionGuard, mpsc::Receiver<OutboundRequest>) {
        let n = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let id = EndpointId::new(format!("{prefix}-{n}"));
        let cancel_token = self.global_cancel.read().child_token();
        let (tx, rx) = mpsc::channel(self.outbound_capacity);

        self.connections.insert(
            id.clone(),
            EndpointLink {
                group: group.clone(),
                tx,
            },
        );
        log::info!(
            "[Hub] Endpoint registered: {} in {} (total: {})",
            id,
            group,
            self.connections.len()
        );
        self.emitter.emit_endpoint(EndpointEvent::Connected {
            endpoint_id: id.clone(),
            group: group.clone(),
            timestamp: now_millis(),
        });

        let guard = ConnectionGuard {
            id,
            group,
            hub: Arc::clone(self),
            cancel_token,
        };
        (guard, rx)
    }

    fn unregister(&self, id: &EndpointId) {
        let Some((_, link)) = self.connections.remove(id) else {
            return;
        };
        // Answers from this endpoint can no longer arrive.
        self.pending.retain(|_, pending| pending.endpoint != *id);
        log::info!(
            "[Hub] Endpoint unregistered: {} (remaining: {})",
            id,
            self.connections.len()
        );
        self.emitter.emit_endpoint(EndpointEvent::Disconnected {
            endpoint_id: id.clone(),
            group: link.group,
            timestamp: now_millis(),
        });
    }

    /// Routes an acknowledgment to the waiting request.
    ///
    /// The ack is attributed to the connection it arrived on. Acks for
    /// unknown or expired requests, or for requests addressed to a different
    /// endpoint, are dropped. Returns `true` if a waiter received it.
    pub fn resolve_ack(
        &self,
        connection: &EndpointId,
        request_id: u64,
        claimed: Option<&EndpointId>,
        success: bool,
    ) -> bool {
        if let Some(claimed) = claimed {
            if claimed != connection {
                log::warn!(
                    "[Hub] Ack on {} claims endpoint {}, using connection id",
                    connection,
                    claimed
                );
            }
        }

        let Some((_, pending)) = self
            .pending
            .remove_if(&request_id, |_, pending| pending.endpoint == *connection)
        else {
            log::debug!(
                "[Hub] Ignoring ack for unknown request {} from {}",
                request_id,
                connection
            );
            return false;
        };
        pending.tx.send(success).is_ok()
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Force-closes all connections.
    ///
    /// Cancels the global token and installs a fresh one so new connections
    /// can still be accepted. Returns the number of connections signalled.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[Hub] Force-closing {} endpoint(s)", count);
        }
        let mut guard = self.global_cancel.write();
        guard.cancel();
        *guard = CancellationToken::new();
        count
    }

    fn deliver(&self, endpoint: &EndpointId, request: OutboundRequest) -> bool {
        let Some(link) = self.connections.get(endpoint) else {
            log::debug!("[Hub] {} disconnected before delivery", endpoint);
            return false;
        };
        match link.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("[Hub] Outbound queue full for {}", endpoint);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("[Hub] Outbound queue closed for {}", endpoint);
                false
            }
        }
    }
}

/// Removes the pending entries of one fan-out once it stops waiting.
struct PendingCleanup<'a> {
    pending: &'a DashMap<u64, PendingAck>,
    request_ids: Vec<u64>,
}

impl Drop for PendingCleanup<'_> {
    fn drop(&mut self) {
        for id in &self.request_ids {
            self.pending.remove(id);
        }
    }
}

#[async_trait]
impl GroupTransport for EndpointHub {
    fn members(&self, group: &GroupId) -> Vec<EndpointId> {
        let mut members: Vec<EndpointId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().group == *group)
            .map(|entry| entry.key().clone())
            .collect();
        members.sort();
        members
    }

    async fn request(
        &self,
        endpoints: &[EndpointId],
        command: Command,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AckCollection {
        let mut cleanup = PendingCleanup {
            pending: &self.pending,
            request_ids: Vec::with_capacity(endpoints.len()),
        };
        let mut waiting = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            self.pending.insert(
                request_id,
                PendingAck {
                    endpoint: endpoint.clone(),
                    tx,
                },
            );
            cleanup.request_ids.push(request_id);

            let request = OutboundRequest {
                request_id,
                command: command.clone(),
            };
            if !self.deliver(endpoint, request) {
                self.pending.remove(&request_id);
            }
            waiting.push((endpoint.clone(), async move { rx.await.ok() }));
        }

        log::debug!(
            "[Hub] Sent {} to {} endpoint(s)",
            command.name(),
            endpoints.len()
        );
        collect_acks(waiting, timeout, cancel).await
    }
}

/// Unregisters an endpoint when dropped.
pub struct ConnectionGuard {
    id: EndpointId,
    group: GroupId,
    hub: Arc<EndpointHub>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Token cancelled when the hub force-closes connections.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Routes an ack received on this connection.
    pub fn resolve_ack(&self, request_id: u64, claimed: Option<&EndpointId>, success: bool) -> bool {
        self.hub.resolve_ack(&self.id, request_id, claimed, success)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.id);
    }
}

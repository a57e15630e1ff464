//! In-process endpoint for co-located playback.
//!
//! Registers in the hub like a WebSocket endpoint, so the coordinator treats
//! it as one more member of its group.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{EndpointId, GroupId};
use crate::runtime::TaskSpawner;
use crate::services::endpoint::EndpointSession;
use crate::transport::{EndpointHub, OutboundRequest};

/// Registers `session` in `group` and serves it until `shutdown` fires or the
/// hub closes the connection.
pub fn spawn_local_endpoint(
    hub: &Arc<EndpointHub>,
    group: GroupId,
    session: Arc<EndpointSession>,
    spawner: &impl TaskSpawner,
    shutdown: CancellationToken,
) -> EndpointId {
    let (guard, mut requests) = hub.register(group, "local");
    let id = guard.id().clone();
    let (replies_tx, mut replies) = mpsc::unbounded_channel();

    spawner.spawn(async move {
        let closed = guard.cancel_token().clone();
        log::info!("[Endpoint] Local endpoint {} joined {}", guard.id(), guard.group());
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = closed.cancelled() => break,
                request = requests.recv() => match request {
                    Some(OutboundRequest { request_id, command }) => {
                        session.dispatch(request_id, command, &replies_tx);
                    }
                    None => break,
                },
                Some(reply) = replies.recv() => {
                    guard.resolve_ack(reply.request_id, None, reply.success);
                }
            }
        }
        session.stop();
        log::info!("[Endpoint] Local endpoint {} stopped", guard.id());
    });

    id
}

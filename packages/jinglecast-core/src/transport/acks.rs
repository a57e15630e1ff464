use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use super::AckCollection;
use crate::protocol::{Ack, EndpointId};

/// Waits for per-endpoint answers until all arrive, `timeout` elapses or
/// `cancel` fires.
///
/// Each future resolves to `Some(success)` when its endpoint answered and to
/// `None` when the answer can no longer arrive (connection gone). Endpoints
/// without an answer are reported in [`AckCollection::missing`].
pub async fn collect_acks<F>(
    pending: Vec<(EndpointId, F)>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> AckCollection
where
    F: Future<Output = Option<bool>> + Send,
{
    let expected: Vec<EndpointId> = pending.iter().map(|(id, _)| id.clone()).collect();
    let mut in_flight: FuturesUnordered<_> = pending
        .into_iter()
        .map(|(id, answer)| async move { (id, answer.await) })
        .collect();

    let mut acks = Vec::with_capacity(expected.len());
    let mut interrupted = false;
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while !in_flight.is_empty() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                interrupted = true;
                break;
            }
            next = in_flight.next() => match next {
                Some((endpoint_id, Some(success))) => acks.push(Ack { endpoint_id, success }),
                Some((_, None)) => {}
                None => break,
            },
            () = &mut deadline => break,
        }
    }

    let answered: HashSet<&EndpointId> = acks.iter().map(|ack| &ack.endpoint_id).collect();
    let missing = expected
        .iter()
        .filter(|id| !answered.contains(id))
        .cloned()
        .collect();

    AckCollection {
        acks,
        missing,
        interrupted,
    }
}

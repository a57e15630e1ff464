//! Group membership and request/acknowledgment transport.
//!
//! The coordinator talks to endpoints only through [`GroupTransport`]: it
//! resolves a group to its current endpoints and sends one command to a set
//! of them, getting back whoever answered within the timeout.

mod acks;
mod hub;

pub use acks::collect_acks;
pub use hub::{ConnectionGuard, EndpointHub, OutboundRequest};

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Ack, Command, EndpointId, GroupId};

/// Answers gathered for one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckCollection {
    /// Acknowledgments in arrival order.
    pub acks: Vec<Ack>,
    /// Endpoints that did not answer before the deadline.
    pub missing: Vec<EndpointId>,
    /// The wait was cut short by cancellation.
    pub interrupted: bool,
}

impl AckCollection {
    /// Endpoints that answered at all, regardless of success.
    #[must_use]
    pub fn responders(&self) -> Vec<EndpointId> {
        self.acks.iter().map(|ack| ack.endpoint_id.clone()).collect()
    }

    /// Number of answers with `success = true`.
    #[must_use]
    pub fn successes(&self) -> usize {
        self.acks.iter().filter(|ack| ack.success).count()
    }
}

/// Delivers commands to the endpoints of a group.
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Endpoints currently connected to `group`.
    fn members(&self, group: &GroupId) -> Vec<EndpointId>;

    /// Sends `command` to each of `endpoints` and waits for their answers.
    ///
    /// Resolves when every endpoint answered, the timeout elapsed, or
    /// `cancel` fired, whichever comes first. Undeliverable commands count
    /// as missing answers.
    async fn request(
        &self,
        endpoints: &[EndpointId],
        command: Command,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AckCollection;
}

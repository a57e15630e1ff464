//! Two-phase broadcast orchestration.
//!
//! Responsibilities:
//! - Resolve the endpoints of a group
//! - PREPARE everyone, PLAY only those who staged the clip
//! - Fan STOP out to a group
//! - Report counts and publish progress events

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::audio::pcm_duration;
use crate::events::{EventEmitter, PlaybackEvent};
use crate::protocol::{Command, EventId, GroupId};
use crate::state::BroadcastTimeouts;
use crate::transport::GroupTransport;
use crate::utils::{duration_millis, now_millis};

/// One clip to broadcast to a group.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub event_id: EventId,
    pub group: GroupId,
    /// PCM s16le, 48 kHz, mono.
    pub pcm: Bytes,
}

/// Counts of one finished broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub event_id: EventId,
    /// Endpoints in the group when the broadcast started.
    pub resolved: usize,
    /// Endpoints that acknowledged PREPARE.
    pub prepared: usize,
    /// Endpoints that reported a complete playback.
    pub played: usize,
    /// The broadcast was cancelled before it finished.
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Nobody is connected to the group. Nothing was sent.
    NoEndpoints,
    Completed(BroadcastReport),
}

/// Counts of one stop fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    pub resolved: usize,
    pub confirmed: usize,
}

impl StopReport {
    /// Endpoints that did not confirm the stop.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.resolved.saturating_sub(self.confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NoEndpoints,
    Completed(StopReport),
}

/// Drives PREPARE → PLAY and STOP across the endpoints of a group.
pub struct BroadcastCoordinator {
    transport: Arc<dyn GroupTransport>,
    emitter: Arc<dyn EventEmitter>,
    timeouts: BroadcastTimeouts,
}

impl BroadcastCoordinator {
    pub fn new(
        transport: Arc<dyn GroupTransport>,
        emitter: Arc<dyn EventEmitter>,
        timeouts: BroadcastTimeouts,
    ) -> Self {
        Self {
            transport,
            emitter,
            timeouts,
        }
    }

    /// Broadcasts a clip and waits for the outcome.
    ///
    /// PLAY is sent only to endpoints that acknowledged PREPARE in time.
    /// Cancelling `cancel` ends the current wait and skips later phases.
    pub async fn broadcast(
        &self,
        request: BroadcastRequest,
        cancel: &CancellationToken,
    ) -> BroadcastOutcome {
        let BroadcastRequest {
            event_id,
            group,
            pcm,
        } = request;

        let endpoints = self.transport.members(&group);
        if endpoints.is_empty() {
            log::info!("[Broadcast] {} has no endpoints, skipping {}", group, event_id);
            return BroadcastOutcome::NoEndpoints;
        }

        let duration = pcm_duration(pcm.len());
        let resolved = endpoints.len();
        log::info!(
            "[Broadcast] {} to {} endpoint(s) in {} ({} ms)",
            event_id,
            resolved,
            group,
            duration_millis(duration)
        );
        self.emitter.emit_playback(PlaybackEvent::Started {
            event_id,
            group: group.clone(),
            resolved,
            duration_ms: duration_millis(duration),
            timestamp: now_millis(),
        });

        let prepare = self
            .transport
            .request(
                &endpoints,
                Command::Prepare { event_id, pcm },
                self.timeouts.prepare(),
                cancel,
            )
            .await;
        let ready: Vec<_> = prepare
            .acks
            .iter()
            .filter(|ack| ack.success)
            .map(|ack| ack.endpoint_id.clone())
            .collect();
        let prepared = ready.len();

        if !prepare.missing.is_empty() {
            log::warn!(
                "[Broadcast] {} not prepared on: {:?}",
                event_id,
                prepare.missing
            );
        }
        self.emitter.emit_playback(PlaybackEvent::Prepared {
            event_id,
            resolved,
            prepared,
            timestamp: now_millis(),
        });

        let mut report = BroadcastReport {
            event_id,
            resolved,
            prepared,
            played: 0,
            interrupted: prepare.interrupted,
        };

        if !report.interrupted && !ready.is_empty() {
            let play = self
                .transport
                .request(
                    &ready,
                    Command::Play { event_id },
                    self.timeouts.play(duration),
                    cancel,
                )
                .await;
            report.played = play.successes();
            report.interrupted = play.interrupted;
        }

        log::info!(
            "[Broadcast] {} done: resolved={} prepared={} played={}{}",
            event_id,
            report.resolved,
            report.prepared,
            report.played,
            if report.interrupted { " (interrupted)" } else { "" }
        );
        self.emitter.emit_playback(PlaybackEvent::Completed {
            event_id,
            resolved: report.resolved,
            prepared: report.prepared,
            played: report.played,
            interrupted: report.interrupted,
            timestamp: now_millis(),
        });

        BroadcastOutcome::Completed(report)
    }

    /// Sends STOP to every endpoint of `group`.
    pub async fn stop(&self, group: &GroupId) -> StopOutcome {
        let endpoints = self.transport.members(group);
        if endpoints.is_empty() {
            return StopOutcome::NoEndpoints;
        }

        let acks = self
            .transport
            .request(
                &endpoints,
                Command::Stop,
                self.timeouts.stop(),
                &CancellationToken::new(),
            )
            .await;
        let report = StopReport {
            resolved: endpoints.len(),
            confirmed: acks.successes(),
        };

        if report.failed() > 0 {
            log::warn!(
                "[Broadcast] Stop in {}: {} of {} endpoint(s) did not confirm",
                group,
                report.failed(),
                report.resolved
            );
        } else {
            log::info!("[Broadcast] Stopped {} endpoint(s) in {}", report.resolved, group);
        }
        self.emitter.emit_playback(PlaybackEvent::Stopped {
            group: group.clone(),
            resolved: report.resolved,
            confirmed: report.confirmed,
            timestamp: now_millis(),
        });

        StopOutcome::Completed(report)
    }
}

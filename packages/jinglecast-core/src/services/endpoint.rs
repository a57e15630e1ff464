//! Endpoint-side command handling.
//!
//! An endpoint stages the clip on PREPARE and plays it when the matching PLAY
//! arrives. PREPARE arms the player right away so a newer PREPARE or a STOP
//! cancels the staged clip before it ever reaches the output.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::operation::Operation;
use crate::player::SingleFlightPlayer;
use crate::protocol::{Command, EventId};
use crate::runtime::{TaskSpawner, TokioSpawner};

/// Acknowledgment produced by the session for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckReply {
    pub request_id: u64,
    pub success: bool,
}

struct PreparedEvent {
    event_id: EventId,
    pcm: Bytes,
    operation: Operation,
}

/// Command state of one playback endpoint.
pub struct EndpointSession {
    player: Arc<SingleFlightPlayer>,
    pending: Arc<Mutex<Option<PreparedEvent>>>,
    window: Duration,
    spawner: TokioSpawner,
}

impl EndpointSession {
    /// Creates a session. A staged clip is dropped if its PLAY does not
    /// arrive within `window`.
    pub fn new(player: Arc<SingleFlightPlayer>, window: Duration, spawner: TokioSpawner) -> Self {
        Self {
            player,
            pending: Arc::new(Mutex::new(None)),
            window,
            spawner,
        }
    }

    /// Stages `pcm` for `event_id`, superseding whatever was staged or
    /// playing.
    pub fn prepare(&self, event_id: EventId, pcm: Bytes) {
        let operation = self.player.arm();
        let operation_id = operation.id();
        log::info!(
            "[Endpoint] Prepared {} ({} bytes)",
            event_id,
            pcm.len()
        );
        *self.pending.lock() = Some(PreparedEvent {
            event_id,
            pcm,
            operation,
        });

        let pending = Arc::clone(&self.pending);
        let player = Arc::clone(&self.player);
        let window = self.window;
        self.spawner.spawn(async move {
            tokio::time::sleep(window).await;
            let expired = {
                let mut slot = pending.lock();
                let current = slot.as_ref().is_some_and(|prepared| {
                    prepared.event_id == event_id && prepared.operation.id() == operation_id
                });
                if current {
                    slot.take()
                } else {
                    None
                }
            };
            if let Some(expired) = expired {
                log::warn!("[Endpoint] No PLAY for {} in time, discarding", event_id);
                player.release(&expired.operation);
            }
        });
    }

    /// Starts playback of the clip staged for `event_id`.
    ///
    /// Returns `None` if nothing is staged under that id; such a PLAY is
    /// stale and gets no answer. The future resolves with whether the clip
    /// played to the end.
    pub fn play(&self, event_id: &EventId) -> Option<BoxFuture<'static, bool>> {
        let prepared = {
            let mut slot = self.pending.lock();
            if slot
                .as_ref()
                .is_some_and(|prepared| prepared.event_id == *event_id)
            {
                slot.take()
            } else {
                None
            }
        };
        let Some(prepared) = prepared else {
            log::debug!("[Endpoint] Ignoring PLAY for unknown event {}", event_id);
            return None;
        };

        let player = Arc::clone(&self.player);
        let id = prepared.event_id.to_string();
        Some(
            async move {
                match player
                    .play_armed(&id, prepared.pcm, prepared.operation)
                    .await
                {
                    Ok(played) => played,
                    Err(e) => {
                        log::warn!("[Endpoint] Playback of {} failed: {}", id, e);
                        false
                    }
                }
            }
            .boxed(),
        )
    }

    /// Cancels staged or running playback. Always succeeds.
    pub fn stop(&self) -> bool {
        self.player.stop();
        true
    }

    /// Handles one request from the coordinator.
    ///
    /// PREPARE and STOP are answered before this returns, so requests are
    /// applied in arrival order. Only the playback behind PLAY is spawned; its
    /// answer is sent on `replies` when it ends.
    pub fn dispatch(
        &self,
        request_id: u64,
        command: Command,
        replies: &mpsc::UnboundedSender<AckReply>,
    ) {
        match command {
            Command::Prepare { event_id, pcm } => {
                self.prepare(event_id, pcm);
                let _ = replies.send(AckReply {
                    request_id,
                    success: true,
                });
            }
            Command::Play { event_id } => {
                let Some(playback) = self.play(&event_id) else {
                    return;
                };
                let replies = replies.clone();
                self.spawner.spawn(async move {
                    let success = playback.await;
                    let _ = replies.send(AckReply {
                        request_id,
                        success,
                    });
                });
            }
            Command::Stop => {
                let success = self.stop();
                let _ = replies.send(AckReply {
                    request_id,
                    success,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeOutput;
    use crate::protocol_constants::PREPARE_WINDOW_MS;

    fn session(output: Arc<FakeOutput>) -> EndpointSession {
        EndpointSession::new(
            Arc::new(SingleFlightPlayer::new(output)),
            Duration::from_millis(PREPARE_WINDOW_MS),
            TokioSpawner::current(),
        )
    }

    fn pcm() -> Bytes {
        Bytes::from_static(&[0; 32])
    }

    #[tokio::test(start_paused = true)]
    async fn matching_play_plays_staged_clip() {
        let output = FakeOutput::new(Duration::from_secs(1));
        let session = session(output.clone());
        let event = EventId::new();

        session.prepare(event, pcm());
        let playback = session.play(&event).expect("clip should be staged");

        assert!(playback.await);
        assert_eq!(output.started(), 1);
        assert!(session.play(&event).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_play_is_ignored() {
        let output = FakeOutput::new(Duration::from_secs(1));
        let session = session(output.clone());

        session.prepare(EventId::new(), pcm());

        assert!(session.play(&EventId::new()).is_none());
        assert_eq!(output.started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn staged_clip_expires_after_window() {
        let output = FakeOutput::new(Duration::from_secs(1));
        let session = session(output.clone());
        let event = EventId::new();

        session.prepare(event, pcm());
        tokio::time::sleep(Duration::from_millis(PREPARE_WINDOW_MS + 1)).await;

        assert!(session.play(&event).is_none());
        assert!(!session.player.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_prepare_supersedes_staged_clip() {
        let output = FakeOutput::new(Duration::from_secs(1));
        let session = session(output.clone());
        let first = EventId::new();
        let second = EventId::new();

        session.prepare(first, pcm());
        session.prepare(second, pcm());

        assert!(session.play(&first).is_none());
        assert!(session.play(&second).unwrap().await);
        assert_eq!(output.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_playback() {
        let output = FakeOutput::new(Duration::from_secs(5));
        let session = session(output.clone());
        let event = EventId::new();

        session.prepare(event, pcm());
        let playback = tokio::spawn(session.play(&event).unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(session.stop());
        assert!(!playback.await.unwrap());
    }

    #[tokio::test]
    async fn stop_on_idle_player_is_acknowledged_as_success() {
        let session = session(FakeOutput::new(Duration::ZERO));
        let (tx, mut rx) = mpsc::unbounded_channel();

        session.dispatch(9, Command::Stop, &tx);

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.request_id, 9);
        assert!(reply.success);
    }

    #[tokio::test(start_paused = true)]
    async fn play_after_stop_answers_false() {
        let output = FakeOutput::new(Duration::from_secs(1));
        let session = session(output.clone());
        let event = EventId::new();

        session.prepare(event, pcm());
        session.stop();

        assert!(!session.play(&event).unwrap().await);
        assert_eq!(output.started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_answers_in_order() {
        let session = session(FakeOutput::new(Duration::from_secs(1)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = EventId::new();

        session.dispatch(1, Command::Prepare { event_id: event, pcm: pcm() }, &tx);
        assert_eq!(rx.recv().await, Some(AckReply { request_id: 1, success: true }));

        session.dispatch(2, Command::Play { event_id: EventId::new() }, &tx);
        session.dispatch(3, Command::Play { event_id: event }, &tx);
        assert_eq!(rx.recv().await, Some(AckReply { request_id: 3, success: true }));

        session.dispatch(4, Command::Stop, &tx);
        assert_eq!(rx.recv().await, Some(AckReply { request_id: 4, success: true }));
        assert!(rx.try_recv().is_err());
    }
}

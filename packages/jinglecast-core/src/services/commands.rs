//! Operator commands.
//!
//! Each method implements one chat command (`/token`, `/jingle`,
//! `/deljingle`, `/play`, `/stop`) and returns the reply shown to the chat.
//! Transport-agnostic: the HTTP layer only maps paths and bodies onto these.

use std::sync::Arc;

use serde::Serialize;

use crate::audio::{concat_pcm, AudioRef, AudioSource};
use crate::error::{JingleError, JingleResult};
use crate::protocol::{EventId, GroupId};
use crate::protocol_constants::{MAX_BROADCAST_PCM_BYTES, MAX_BROADCAST_SECS};
use crate::queue::QueueError;
use crate::services::coordinator::{
    BroadcastOutcome, BroadcastReport, BroadcastRequest, StopOutcome, StopReport,
};
use crate::services::scheduler::PlaybackScheduler;
use crate::state::Config;
use crate::store::ChatStore;

const NO_ENDPOINTS_MESSAGE: &str = "No clients are connected.";

#[derive(Debug, Clone, Serialize)]
pub struct TokenReply {
    pub token: GroupId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReply {
    pub message: String,
}

impl MessageReply {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayReply {
    pub event_id: EventId,
    pub resolved: usize,
    pub prepared: usize,
    pub played: usize,
    pub interrupted: bool,
    pub message: String,
}

impl PlayReply {
    fn from_outcome(event_id: EventId, outcome: BroadcastOutcome) -> Self {
        match outcome {
            BroadcastOutcome::NoEndpoints => Self {
                event_id,
                resolved: 0,
                prepared: 0,
                played: 0,
                interrupted: false,
                message: NO_ENDPOINTS_MESSAGE.to_string(),
            },
            BroadcastOutcome::Completed(report) => Self {
                message: format!(
                    "{} clients answered successfully, {} of them finished playing.",
                    report.prepared, report.played
                ),
                event_id: report.event_id,
                resolved: report.resolved,
                prepared: report.prepared,
                played: report.played,
                interrupted: report.interrupted,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReply {
    pub resolved: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub message: String,
}

impl From<StopOutcome> for StopReply {
    fn from(outcome: StopOutcome) -> Self {
        match outcome {
            StopOutcome::NoEndpoints => Self {
                resolved: 0,
                confirmed: 0,
                failed: 0,
                message: NO_ENDPOINTS_MESSAGE.to_string(),
            },
            StopOutcome::Completed(report) => Self {
                message: stop_message(&report),
                resolved: report.resolved,
                confirmed: report.confirmed,
                failed: report.failed(),
            },
        }
    }
}

fn stop_message(report: &StopReport) -> String {
    if report.failed() == 0 {
        "All clients stopped successfully.".to_string()
    } else {
        format!(
            "{} of {} clients could not be stopped.",
            report.failed(),
            report.resolved
        )
    }
}

/// Executes operator commands against the store and the scheduler.
pub struct CommandService {
    config: Arc<Config>,
    store: Arc<ChatStore>,
    source: Arc<dyn AudioSource>,
    scheduler: Arc<PlaybackScheduler>,
}

impl CommandService {
    pub fn new(
        config: Arc<Config>,
        store: Arc<ChatStore>,
        source: Arc<dyn AudioSource>,
        scheduler: Arc<PlaybackScheduler>,
    ) -> Self {
        Self {
            config,
            store,
            source,
            scheduler,
        }
    }

    fn check_allowed(&self, chat_id: i64) -> JingleResult<()> {
        if self.config.is_chat_allowed(chat_id) {
            Ok(())
        } else {
            log::warn!("[Commands] Rejected chat {}", chat_id);
            Err(JingleError::ChatNotAllowed)
        }
    }

    fn group_of(&self, chat_id: i64) -> JingleResult<GroupId> {
        self.store.token(chat_id).ok_or(JingleError::NoToken)
    }

    /// `/token`: the chat's group token, created on first use.
    pub fn token(&self, chat_id: i64) -> JingleResult<TokenReply> {
        self.check_allowed(chat_id)?;
        let token = self.store.generate_token(chat_id)?;
        Ok(TokenReply {
            message: format!("Token for this chat: {token}"),
            token,
        })
    }

    /// `/jingle`: remembers the clip played before every broadcast.
    pub fn set_jingle(&self, chat_id: i64, audio: Option<AudioRef>) -> JingleResult<MessageReply> {
        self.check_allowed(chat_id)?;
        let audio = audio.ok_or_else(|| JingleError::NoAudio {
            command: "jingle".into(),
        })?;
        if audio.exceeds_size_limit() {
            return Err(JingleError::AudioTooLarge);
        }
        self.store.set_jingle(chat_id, audio)?;
        log::info!("[Commands] Jingle set for chat {}", chat_id);
        Ok(MessageReply::new("Jingle saved."))
    }

    /// `/deljingle`
    pub fn delete_jingle(&self, chat_id: i64) -> JingleResult<MessageReply> {
        self.check_allowed(chat_id)?;
        if self.store.delete_jingle(chat_id)? {
            log::info!("[Commands] Jingle deleted for chat {}", chat_id);
        }
        Ok(MessageReply::new("Jingle deleted."))
    }

    /// `/play`: converts the jingle (if any) and the clip, then broadcasts
    /// both to the chat's group and waits for the result.
    pub async fn play(&self, chat_id: i64, audio: Option<AudioRef>) -> JingleResult<PlayReply> {
        self.check_allowed(chat_id)?;
        let group = self.group_of(chat_id)?;
        let audio = audio.ok_or_else(|| JingleError::NoAudio {
            command: "play".into(),
        })?;
        if audio.exceeds_size_limit() {
            return Err(JingleError::AudioTooLarge);
        }

        log::info!("[Commands] /play in chat {} for {}", chat_id, group);
        let clip = self.source.fetch_pcm(&audio.url);
        let pcm = match self.store.jingle(chat_id) {
            Some(jingle) => {
                let (jingle, clip) = tokio::try_join!(self.source.fetch_pcm(&jingle.url), clip)?;
                concat_pcm(vec![jingle, clip])
            }
            None => clip.await?,
        };
        if pcm.len() > MAX_BROADCAST_PCM_BYTES {
            log::warn!(
                "[Commands] Rejected {} bytes of PCM in chat {}, above the broadcast limit",
                pcm.len(),
                chat_id
            );
            return Err(JingleError::AudioTooLong {
                max_minutes: MAX_BROADCAST_SECS / 60,
            });
        }

        let event_id = EventId::new();
        let handle = self.scheduler.schedule(BroadcastRequest {
            event_id,
            group,
            pcm,
        })?;
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(QueueError::Cancelled | QueueError::Dropped) => {
                log::info!("[Commands] {} was cancelled before it started", event_id);
                BroadcastOutcome::Completed(BroadcastReport {
                    event_id,
                    resolved: 0,
                    prepared: 0,
                    played: 0,
                    interrupted: true,
                })
            }
            Err(QueueError::Panicked) => {
                return Err(JingleError::Internal(format!("broadcast {event_id} panicked")));
            }
            Err(QueueError::Failed(never)) => match never {},
        };
        Ok(PlayReply::from_outcome(event_id, outcome))
    }

    /// `/stop`: aborts the chat's broadcasts and stops its endpoints.
    pub async fn stop(&self, chat_id: i64) -> JingleResult<StopReply> {
        self.check_allowed(chat_id)?;
        let group = self.group_of(chat_id)?;
        log::info!("[Commands] /stop in chat {} for {}", chat_id, group);
        Ok(self.scheduler.stop(&group).await.into())
    }

    /// Cancels one broadcast of the chat, queued or running.
    pub fn cancel_request(&self, chat_id: i64, event_id: &EventId) -> JingleResult<MessageReply> {
        self.check_allowed(chat_id)?;
        let group = self.group_of(chat_id)?;
        if !self.scheduler.cancel(&group, event_id) {
            return Err(JingleError::RequestNotFound(event_id.to_string()));
        }
        Ok(MessageReply::new("Request cancelled."))
    }
}

//! Single-flight audio player.
//!
//! At most one playback operation is active per player. Starting a new one
//! cancels the previous one, and the audio output itself is guarded so two
//! output processes never overlap, even while a superseded one winds down.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::audio::{AudioOutput, OutputError};
use crate::operation::{Operation, OperationSlot};

/// Playback failed for a reason other than being superseded.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output failed: {0}")]
    Output(#[from] OutputError),
}

/// Plays one clip at a time, newest request wins.
pub struct SingleFlightPlayer {
    output: Arc<dyn AudioOutput>,
    slot: OperationSlot,
    output_lock: tokio::sync::Mutex<()>,
}

impl SingleFlightPlayer {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            slot: OperationSlot::new(),
            output_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Supersedes the active playback and plays `pcm`.
    ///
    /// Returns `Ok(true)` if the clip played to the end and `Ok(false)` if it
    /// was superseded or stopped.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::Output`] if the output failed while this
    /// playback was still current.
    pub async fn play(&self, id: &str, pcm: Bytes) -> Result<bool, PlaybackError> {
        let operation = self.arm();
        self.play_armed(id, pcm, operation).await
    }

    /// Supersedes the active playback and returns the new operation.
    ///
    /// Endpoints arm at PREPARE time so a STOP or a newer PREPARE arriving
    /// before PLAY cancels the staged clip.
    pub fn arm(&self) -> Operation {
        self.slot.start()
    }

    /// Plays `pcm` under an operation previously returned by [`arm`](Self::arm).
    ///
    /// # Errors
    ///
    /// Same as [`play`](Self::play).
    pub async fn play_armed(
        &self,
        id: &str,
        pcm: Bytes,
        operation: Operation,
    ) -> Result<bool, PlaybackError> {
        if operation.is_cancelled() {
            log::debug!("[Player] {} superseded before start", id);
            self.slot.finish(&operation);
            return Ok(false);
        }

        let signal = operation.signal();
        let _output = tokio::select! {
            guard = self.output_lock.lock() => guard,
            () = signal.cancelled() => {
                log::debug!("[Player] {} superseded while waiting for output", id);
                self.slot.finish(&operation);
                return Ok(false);
            }
        };
        if operation.is_cancelled() {
            self.slot.finish(&operation);
            return Ok(false);
        }

        log::info!("[Player] Playing {} ({} bytes)", id, pcm.len());
        let result = self.output.play(pcm, signal).await;
        let completed = self.slot.finish(&operation);

        match result {
            Ok(played) => {
                let played = played && completed;
                log::info!(
                    "[Player] {} {}",
                    id,
                    if played { "finished" } else { "interrupted" }
                );
                Ok(played)
            }
            Err(e) if !completed => {
                log::debug!("[Player] {} output error after cancel: {}", id, e);
                Ok(false)
            }
            Err(e) => {
                log::error!("[Player] {} failed: {}", id, e);
                Err(e.into())
            }
        }
    }

    /// Cancels the active playback, if any.
    ///
    /// Idempotent. Returns `true` if something was active. `false` only means
    /// nothing was running; a STOP that finds the player idle has still
    /// succeeded and must be acknowledged as such.
    pub fn stop(&self) -> bool {
        let stopped = self.slot.cancel();
        if stopped {
            log::info!("[Player] Stopped active playback");
        }
        stopped
    }

    /// Cancels an armed operation that will never be played.
    ///
    /// Leaves a newer operation untouched.
    pub fn release(&self, operation: &Operation) {
        operation.cancel();
        self.slot.finish(operation);
    }

    /// Returns `true` while an operation is armed or playing.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.slot.has_active()
    }
}

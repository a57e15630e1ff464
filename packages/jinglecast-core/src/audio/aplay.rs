//! ALSA `aplay`-backed [`AudioOutput`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{AudioOutput, OutputError};
use crate::operation::CancelSignal;
use crate::protocol_constants::PCM_SAMPLE_RATE;

/// Plays raw PCM by feeding it to an `aplay` child process.
#[derive(Debug, Clone)]
pub struct AplayOutput {
    program: PathBuf,
    device: Option<String>,
}

impl AplayOutput {
    /// Creates an output for the given binary and optional ALSA device.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, device: Option<String>) -> Self {
        Self {
            program: program.into(),
            device,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            "-r".to_string(),
            PCM_SAMPLE_RATE.to_string(),
            "-t".to_string(),
            "raw".to_string(),
            "-f".to_string(),
            "S16_LE".to_string(),
            "-c1".to_string(),
        ];
        if let Some(device) = &self.device {
            args.push("-D".to_string());
            args.push(device.clone());
        }
        args
    }

    /// Checks that the player binary can be executed.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::NotInstalled`] if the binary is missing.
    pub async fn probe(&self) -> Result<(), OutputError> {
        let status = Command::new(&self.program)
            .arg("-L")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(OutputError::Exited(status.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                OutputError::NotInstalled(self.program.display().to_string()),
            ),
            Err(e) => Err(OutputError::Spawn(e)),
        }
    }
}

#[async_trait]
impl AudioOutput for AplayOutput {
    async fn play(&self, pcm: Bytes, cancel: CancelSignal) -> Result<bool, OutputError> {
        if cancel.is_cancelled() {
            return Ok(false);
        }

        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(OutputError::Spawn)?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(OutputError::Io(std::io::Error::other("aplay stdin unavailable")));
        };
        log::debug!("[Player] aplay started ({} bytes)", pcm.len());

        let feed = async move {
            let written = stdin.write_all(&pcm).await;
            drop(stdin);
            written
        };

        let finished = tokio::select! {
            () = cancel.cancelled() => None,
            done = async { tokio::join!(feed, child.wait()) } => Some(done),
        };

        let Some((fed, status)) = finished else {
            if let Err(e) = child.start_kill() {
                log::warn!("[Player] Failed to kill aplay: {}", e);
            }
            if let Err(e) = child.wait().await {
                log::warn!("[Player] Failed to reap aplay: {}", e);
            }
            log::debug!("[Player] aplay interrupted");
            return Ok(false);
        };

        let status = status.map_err(OutputError::Io)?;
        if !status.success() {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            return Err(OutputError::Exited(status.to_string()));
        }
        if let Err(e) = fed {
            log::warn!("[Player] aplay stopped reading input: {}", e);
            return Ok(false);
        }
        Ok(true)
    }
}

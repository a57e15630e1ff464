//! Audio collaborators: where PCM comes from and where it is played.
//!
//! Everything inside the broadcast protocol deals in raw PCM (s16le, 48 kHz,
//! mono). The [`AudioSource`] turns an operator-supplied reference into that
//! format and the [`AudioOutput`] renders it on the endpoint's sound device.

mod aplay;
mod ffmpeg;
#[cfg(test)]
pub(crate) mod testing;

pub use aplay::AplayOutput;
pub use ffmpeg::FfmpegSource;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::CancelSignal;
use crate::protocol_constants::{
    MAX_AUDIO_FILE_BYTES, PCM_BYTES_PER_SAMPLE, PCM_CHANNELS, PCM_SAMPLE_RATE,
};

/// Operator-supplied reference to an audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRef {
    /// Where the file can be downloaded from.
    pub url: String,
    /// Size in bytes, if the caller knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl AudioRef {
    /// Returns `true` if the declared size is above the accepted limit.
    #[must_use]
    pub fn exceeds_size_limit(&self) -> bool {
        self.file_size.is_some_and(|size| size > MAX_AUDIO_FILE_BYTES)
    }
}

/// Errors produced while obtaining PCM.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("downloaded file reached {0} bytes, above the limit")]
    TooLarge(u64),

    #[error("failed to start converter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("converter I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("converter exited with {status}")]
    Converter { status: String, stderr: String },
}

/// Errors produced by an audio output.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("audio player '{0}' is not installed")]
    NotInstalled(String),

    #[error("failed to start audio player: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("audio player I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("audio player exited with {0}")]
    Exited(String),
}

/// Produces PCM for a downloadable audio reference.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Downloads and converts the file at `url` to PCM s16le, 48 kHz, mono.
    async fn fetch_pcm(&self, url: &str) -> Result<Bytes, SourceError>;
}

/// Renders PCM on a local sound device.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Plays `pcm` until it ends or `cancel` fires.
    ///
    /// Returns `Ok(true)` when the audio played to the end and `Ok(false)`
    /// when playback was cut short by `cancel`. Implementations must stop the
    /// underlying device or process promptly once `cancel` fires.
    async fn play(&self, pcm: Bytes, cancel: CancelSignal) -> Result<bool, OutputError>;
}

/// Playback duration of a PCM buffer in the broadcast format.
#[must_use]
pub fn pcm_duration(len: usize) -> Duration {
    let bytes_per_second =
        u64::from(PCM_SAMPLE_RATE) * u64::from(PCM_CHANNELS) * u64::from(PCM_BYTES_PER_SAMPLE);
    Duration::from_millis(len as u64 * 1000 / bytes_per_second)
}

/// Joins PCM buffers in order. A single buffer is returned without copying.
#[must_use]
pub fn concat_pcm(parts: Vec<Bytes>) -> Bytes {
    if parts.len() == 1 {
        return parts.into_iter().next().unwrap_or_default();
    }
    let total = parts.iter().map(Bytes::len).sum();
    let mut joined = bytes::BytesMut::with_capacity(total);
    for part in parts {
        joined.extend_from_slice(&part);
    }
    joined.freeze()
}

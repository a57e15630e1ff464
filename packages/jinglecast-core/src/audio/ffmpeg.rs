//! ffmpeg-backed [`AudioSource`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{AudioSource, SourceError};
use crate::protocol_constants::{MAX_AUDIO_FILE_BYTES, PCM_SAMPLE_RATE};
use crate::state::AudioToolsConfig;

/// Downloads audio over HTTP and converts it with an ffmpeg child process.
pub struct FfmpegSource {
    http: reqwest::Client,
    program: PathBuf,
    filter: String,
    max_bytes: u64,
}

impl FfmpegSource {
    /// Creates a source using the configured ffmpeg binary and filter chain.
    ///
    /// Downloads go through the shared `http` client.
    pub fn new(http: reqwest::Client, config: &AudioToolsConfig) -> Self {
        Self {
            http,
            program: config.ffmpeg_path.clone(),
            filter: config.audio_filter.clone(),
            max_bytes: MAX_AUDIO_FILE_BYTES,
        }
    }

    /// Downloads `url`, giving up once the body passes the size limit.
    ///
    /// Chunked responses carry no `Content-Length`, so the limit is checked
    /// against the bytes received as well.
    async fn download(&self, url: &str) -> Result<Bytes, SourceError> {
        let mut response = self.http.get(url).send().await?.error_for_status()?;
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(SourceError::TooLarge(length));
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            let received = body.len() as u64;
            if received > self.max_bytes {
                log::warn!("[Convert] Aborted download of {} after {} bytes", url, received);
                return Err(SourceError::TooLarge(received));
            }
        }
        Ok(body.freeze())
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-f",
            "s16le",
            "-acodec",
            "pcm_s16le",
            "-ar",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push(PCM_SAMPLE_RATE.to_string());
        args.extend(["-ac".to_string(), "1".to_string()]);
        if !self.filter.is_empty() {
            args.extend(["-af".to_string(), self.filter.clone()]);
        }
        args.push("pipe:1".to_string());
        args
    }

    /// Converts an in-memory audio file to PCM.
    ///
    /// # Errors
    ///
    /// Fails when ffmpeg cannot be started or exits unsuccessfully.
    pub async fn convert(&self, input: Bytes) -> Result<Bytes, SourceError> {
        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SourceError::Spawn)?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(SourceError::Io(std::io::Error::other("ffmpeg stdin unavailable")));
        };

        let feed = async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(SourceError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log::error!(
                "[Convert] ffmpeg exited with {}: {}",
                output.status,
                stderr
            );
            return Err(SourceError::Converter {
                status: output.status.to_string(),
                stderr,
            });
        }
        if let Err(e) = fed {
            // ffmpeg may close stdin once it has read enough of the container
            log::debug!("[Convert] ffmpeg closed its input early: {}", e);
        }

        Ok(Bytes::from(output.stdout))
    }
}

#[async_trait]
impl AudioSource for FfmpegSource {
    async fn fetch_pcm(&self, url: &str) -> Result<Bytes, SourceError> {
        let input = self.download(url).await?;
        log::debug!("[Convert] Downloaded {} bytes, converting", input.len());
        self.convert(input).await
    }
}

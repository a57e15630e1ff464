//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use jinglecast_core::protocol_constants::{
    DEFAULT_BIND_PORT, PLAY_GRACE_MS, PREPARE_TIMEOUT_MS, STOP_TIMEOUT_MS,
};
use jinglecast_core::{parse_chat_list, AudioToolsConfig, BroadcastTimeouts, GroupId, HeartbeatConfig};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `JINGLECAST_BIND_PORT`
    pub bind_port: u16,

    /// Directory for `chats.json`.
    /// Override: `JINGLECAST_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Chats allowed to run commands. Empty allows every chat.
    /// Override: `JINGLECAST_ALLOWED_CHATS` (comma separated)
    pub allowed_chats: Vec<i64>,

    /// URL pinged periodically to report liveness.
    /// Override: `JINGLECAST_HEARTBEAT_URL`
    pub heartbeat_url: Option<String>,

    /// Override: `JINGLECAST_HEARTBEAT_INTERVAL`
    pub heartbeat_interval_secs: u64,

    pub prepare_timeout_ms: u64,
    pub play_grace_ms: u64,
    pub stop_timeout_ms: u64,

    pub ffmpeg_path: PathBuf,

    /// ffmpeg `-af` filter chain applied before resampling.
    pub audio_filter: String,

    /// Group token of an endpoint playing on this machine.
    /// Override: `JINGLECAST_LOCAL_TOKEN`
    pub local_endpoint_token: Option<String>,

    pub aplay_path: PathBuf,

    /// ALSA device passed to `aplay -D`.
    pub audio_device: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let audio = AudioToolsConfig::default();
        Self {
            bind_port: DEFAULT_BIND_PORT,
            data_dir: None,
            allowed_chats: Vec::new(),
            heartbeat_url: None,
            heartbeat_interval_secs: HeartbeatConfig::default().interval_secs,
            prepare_timeout_ms: PREPARE_TIMEOUT_MS,
            play_grace_ms: PLAY_GRACE_MS,
            stop_timeout_ms: STOP_TIMEOUT_MS,
            ffmpeg_path: audio.ffmpeg_path,
            audio_filter: audio.audio_filter,
            local_endpoint_token: None,
            aplay_path: audio.aplay_path,
            audio_device: audio.audio_device,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Unparseable numbers are ignored. A malformed chat list is an error.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = var("JINGLECAST_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }
        if let Some(url) = var("JINGLECAST_HEARTBEAT_URL") {
            self.heartbeat_url = Some(url);
        }
        if let Some(secs) = var("JINGLECAST_HEARTBEAT_INTERVAL").and_then(|v| v.parse().ok()) {
            self.heartbeat_interval_secs = secs;
        }
        if let Some(raw) = var("JINGLECAST_ALLOWED_CHATS") {
            self.allowed_chats = parse_chat_list(&raw)
                .map_err(anyhow::Error::msg)
                .context("Invalid JINGLECAST_ALLOWED_CHATS")?;
        }
        if let Some(token) = var("JINGLECAST_LOCAL_TOKEN") {
            self.local_endpoint_token = Some(token);
        }

        // Note: JINGLECAST_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
        Ok(())
    }

    /// Converts to jinglecast-core's Config type.
    pub fn to_core_config(&self) -> Result<jinglecast_core::Config> {
        let local_endpoint = match &self.local_endpoint_token {
            Some(raw) => match GroupId::parse(raw) {
                Ok(group) => Some(group),
                Err(e) => bail!("Invalid local endpoint token: {e}"),
            },
            None => None,
        };

        Ok(jinglecast_core::Config {
            bind_port: self.bind_port,
            data_dir: self.data_dir.clone(),
            allowed_chats: (!self.allowed_chats.is_empty()).then(|| self.allowed_chats.clone()),
            timeouts: BroadcastTimeouts {
                prepare_timeout_ms: self.prepare_timeout_ms,
                play_grace_ms: self.play_grace_ms,
                stop_timeout_ms: self.stop_timeout_ms,
                ..BroadcastTimeouts::default()
            },
            audio: AudioToolsConfig {
                ffmpeg_path: self.ffmpeg_path.clone(),
                audio_filter: self.audio_filter.clone(),
                aplay_path: self.aplay_path.clone(),
                audio_device: self.audio_device.clone(),
            },
            local_endpoint,
            heartbeat: HeartbeatConfig {
                url: self.heartbeat_url.clone(),
                interval_secs: self.heartbeat_interval_secs,
            },
            ..Default::default()
        })
    }
}

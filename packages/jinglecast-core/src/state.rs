//! Core configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::GroupId;
use crate::protocol_constants::{
    DEFAULT_BIND_PORT, EVENT_CHANNEL_CAPACITY, OUTBOUND_QUEUE_CAPACITY, PLAY_GRACE_MS,
    PREPARE_TIMEOUT_MS, PREPARE_WINDOW_MS, STOP_TIMEOUT_MS, WS_HEARTBEAT_CHECK_INTERVAL_SECS,
    WS_HEARTBEAT_TIMEOUT_SECS,
};

/// Default ffmpeg filter chain: loudness normalisation tuned for speech.
pub const DEFAULT_AUDIO_FILTER: &str = "speechnorm=e=12.5:r=0.0001:l=1";

/// Acknowledgment timeouts of the broadcast protocol.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct BroadcastTimeouts {
    /// Wait for PREPARE acks (milliseconds).
    pub prepare_timeout_ms: u64,
    /// Added to the audio duration when waiting for PLAY acks (milliseconds).
    pub play_grace_ms: u64,
    /// Wait for STOP acks (milliseconds).
    pub stop_timeout_ms: u64,
    /// How long an endpoint keeps a prepared clip for its PLAY (milliseconds).
    pub prepare_window_ms: u64,
}

impl BroadcastTimeouts {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first zero timeout.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("prepare_timeout_ms", self.prepare_timeout_ms),
            ("stop_timeout_ms", self.stop_timeout_ms),
            ("prepare_window_ms", self.prepare_window_ms),
        ] {
            if value == 0 {
                return Err(format!("{name} must be >= 1"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn prepare(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    /// PLAY wait for a clip of the given length.
    #[must_use]
    pub fn play(&self, audio: Duration) -> Duration {
        audio + Duration::from_millis(self.play_grace_ms)
    }

    #[must_use]
    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    #[must_use]
    pub fn prepare_window(&self) -> Duration {
        Duration::from_millis(self.prepare_window_ms)
    }
}

impl Default for BroadcastTimeouts {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: PREPARE_TIMEOUT_MS,
            play_grace_ms: PLAY_GRACE_MS,
            stop_timeout_ms: STOP_TIMEOUT_MS,
            prepare_window_ms: PREPARE_WINDOW_MS,
        }
    }
}

/// Paths and options of the external audio tools.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AudioToolsConfig {
    pub ffmpeg_path: PathBuf,
    /// ffmpeg `-af` filter chain. Empty disables filtering.
    pub audio_filter: String,
    pub aplay_path: PathBuf,
    /// ALSA device passed to `aplay -D`.
    pub audio_device: Option<String>,
}

impl Default for AudioToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            audio_filter: DEFAULT_AUDIO_FILTER.to_string(),
            aplay_path: PathBuf::from("aplay"),
            audio_device: None,
        }
    }
}

/// Periodic liveness ping to an external monitor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// URL fetched with GET on every tick. `None` disables the heartbeat.
    pub url: Option<String>,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            url: None,
            interval_secs: 60,
        }
    }
}

/// Configuration for the Jinglecast coordinator.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Port for the HTTP/WS server.
    pub bind_port: u16,

    /// Directory for persisted chat records. `None` keeps them in memory.
    pub data_dir: Option<PathBuf>,

    /// Chats allowed to use the operator commands. `None` allows all.
    pub allowed_chats: Option<Vec<i64>>,

    // Protocol
    pub timeouts: BroadcastTimeouts,

    // Audio
    pub audio: AudioToolsConfig,

    /// Group served by an in-process endpoint playing on this machine.
    pub local_endpoint: Option<GroupId>,

    // Heartbeat
    pub heartbeat: HeartbeatConfig,

    // WebSocket
    /// WebSocket heartbeat timeout (seconds).
    pub ws_heartbeat_timeout_secs: u64,

    /// Interval between WebSocket heartbeat checks (seconds).
    pub ws_heartbeat_check_interval_secs: u64,

    /// Capacity of each endpoint's outbound request queue.
    pub outbound_queue_capacity: usize,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any value would cause runtime issues.
    pub fn validate(&self) -> Result<(), String> {
        self.timeouts.validate()?;
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.outbound_queue_capacity == 0 {
            return Err("outbound_queue_capacity must be >= 1".to_string());
        }
        if self.ws_heartbeat_check_interval_secs == 0 {
            return Err("ws_heartbeat_check_interval_secs must be >= 1".to_string());
        }
        if self.heartbeat.url.is_some() && self.heartbeat.interval_secs == 0 {
            return Err("heartbeat interval must be >= 1 second".to_string());
        }
        Ok(())
    }

    /// Returns `true` if `chat_id` may use the operator commands.
    #[must_use]
    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&chat_id))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: DEFAULT_BIND_PORT,
            data_dir: None,
            allowed_chats: None,
            timeouts: BroadcastTimeouts::default(),
            audio: AudioToolsConfig::default(),
            local_endpoint: None,
            heartbeat: HeartbeatConfig::default(),
            ws_heartbeat_timeout_secs: WS_HEARTBEAT_TIMEOUT_SECS,
            ws_heartbeat_check_interval_secs: WS_HEARTBEAT_CHECK_INTERVAL_SECS,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_port, 4000);
        assert_eq!(config.timeouts.prepare(), Duration::from_secs(10));
        assert_eq!(config.timeouts.stop(), Duration::from_secs(5));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let timeouts = BroadcastTimeouts {
            prepare_timeout_ms: 0,
            ..BroadcastTimeouts::default()
        };
        assert!(timeouts.validate().is_err());

        let timeouts = BroadcastTimeouts {
            stop_timeout_ms: 0,
            ..BroadcastTimeouts::default()
        };
        assert!(timeouts.validate().is_err());
    }

    #[test]
    fn play_timeout_adds_grace() {
        let timeouts = BroadcastTimeouts::default();
        assert_eq!(
            timeouts.play(Duration::from_millis(3_500)),
            Duration::from_millis(5_500)
        );
    }

    #[test]
    fn allow_list() {
        let mut config = Config::default();
        assert!(config.is_chat_allowed(42));

        config.allowed_chats = Some(vec![1, 2]);
        assert!(config.is_chat_allowed(2));
        assert!(!config.is_chat_allowed(42));
    }

    #[test]
    fn zero_event_capacity_is_rejected() {
        let config = Config {
            event_channel_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

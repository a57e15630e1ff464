//! Fixed protocol constants that should NOT be changed.
//!
//! These values are shared by the coordinator and every playback endpoint.
//! Changing any of them breaks compatibility with already deployed clients.

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast Protocol Timing
// ─────────────────────────────────────────────────────────────────────────────

/// How long the coordinator waits for PREPARE acknowledgments (milliseconds).
pub const PREPARE_TIMEOUT_MS: u64 = 10_000;

/// Grace margin added to the audio duration when waiting for PLAY acks (milliseconds).
///
/// PLAY acks arrive after local playback finishes, so the wait tracks the
/// audio length rather than network latency.
pub const PLAY_GRACE_MS: u64 = 2_000;

/// How long the coordinator waits for STOP acknowledgments (milliseconds).
pub const STOP_TIMEOUT_MS: u64 = 5_000;

/// How long an endpoint keeps a prepared event waiting for its PLAY (milliseconds).
pub const PREPARE_WINDOW_MS: u64 = 15_000;

// ─────────────────────────────────────────────────────────────────────────────
// Audio Format
// ─────────────────────────────────────────────────────────────────────────────

/// PCM sample rate (Hz).
pub const PCM_SAMPLE_RATE: u32 = 48_000;

/// PCM channel count (mono).
pub const PCM_CHANNELS: u16 = 1;

/// Bytes per PCM sample (signed 16-bit little endian).
pub const PCM_BYTES_PER_SAMPLE: u32 = 2;

/// Largest audio file accepted from the operator (20 MiB).
///
/// Mirrors the download limit of the chat platform the commands come from.
pub const MAX_AUDIO_FILE_BYTES: u64 = 20 * 1024 * 1024;

/// Longest broadcast (jingle plus clip) in seconds.
pub const MAX_BROADCAST_SECS: u64 = 600;

/// PCM size of a [`MAX_BROADCAST_SECS`] broadcast (57.6 MB).
pub const MAX_BROADCAST_PCM_BYTES: usize = MAX_BROADCAST_SECS as usize
    * PCM_SAMPLE_RATE as usize
    * PCM_CHANNELS as usize
    * PCM_BYTES_PER_SAMPLE as usize;

// ─────────────────────────────────────────────────────────────────────────────
// Group Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Alphabet for group tokens. No `0`, it reads like `O`.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ123456789";

/// Length of a group token.
pub const TOKEN_LENGTH: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Format
// ─────────────────────────────────────────────────────────────────────────────

/// Leading byte of a binary PREPARE frame.
pub const PREPARE_FRAME_TAG: u8 = 0x01;

/// Size of the binary PREPARE header: tag + request id + event uuid.
pub const PREPARE_HEADER_LEN: usize = 1 + 8 + 16;

/// Largest PREPARE frame an endpoint must accept.
///
/// Endpoints raise their WebSocket frame and message limits to this value.
pub const MAX_PREPARE_FRAME_BYTES: usize = PREPARE_HEADER_LEN + MAX_BROADCAST_PCM_BYTES;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "jinglecast";

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default port for the coordinator's HTTP/WebSocket server.
pub const DEFAULT_BIND_PORT: u16 = 4000;

/// Capacity of the event broadcast channel for SSE observers.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of each endpoint's outbound command queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 32;

/// WebSocket heartbeat timeout (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

/// Interval at which endpoints send HEARTBEAT (seconds).
pub const CLIENT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Connect timeout for outgoing HTTP requests (downloads, heartbeat pushes).
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Longest silence between two reads of an HTTP response.
///
/// Bounds stalled transfers without cutting off slow but progressing downloads.
pub const HTTP_READ_TIMEOUT_SECS: u64 = 30;

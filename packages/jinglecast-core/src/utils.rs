//! General utilities shared across the application.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Whole milliseconds of a duration, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// List Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a comma separated list of chat ids, skipping blanks.
///
/// # Errors
///
/// Returns the first entry that is not an integer.
pub fn parse_chat_list(raw: &str) -> Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<i64>().map_err(|_| part.to_string()))
        .collect()
}

//! Outbound heartbeat for uptime monitors.
//!
//! When configured, the server GETs the heartbeat URL right after startup and
//! then at a fixed interval. Runs never overlap: the next tick waits for the
//! previous request to finish.

use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::runtime::TaskSpawner;
use crate::state::HeartbeatConfig;

/// Sends one heartbeat. Returns the round-trip time.
///
/// # Errors
///
/// Fails if the request fails or the monitor answers with an error status.
pub async fn send_heartbeat(http: &reqwest::Client, url: &str) -> Result<Duration, reqwest::Error> {
    let started = Instant::now();
    http.get(url).send().await?.error_for_status()?;
    Ok(started.elapsed())
}

/// Starts the heartbeat loop if a URL is configured.
///
/// Returns `false` when heartbeats are disabled.
pub fn spawn_heartbeat(
    config: &HeartbeatConfig,
    http: reqwest::Client,
    spawner: &impl TaskSpawner,
    shutdown: CancellationToken,
) -> bool {
    let Some(url) = config.url.clone() else {
        return false;
    };
    let period = Duration::from_secs(config.interval_secs.max(1));
    log::info!("[Heartbeat] Every {}s to {}", period.as_secs(), url);

    spawner.spawn_until_cancelled(shutdown, async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match send_heartbeat(&http, &url).await {
                Ok(rtt) => log::debug!("[Heartbeat] Sent ({} ms)", rtt.as_millis()),
                Err(e) => log::warn!("[Heartbeat] Failed: {}", e),
            }
        }
    });
    true
}

//! Startup readiness probe for a freshly launched ComfyUI server.
//!
//! A fixed-interval bounded retry: probe the health endpoint, sleep,
//! repeat until the first success or until the deadline passes.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::ComfyUIApi;

/// Default delay between probes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Default overall deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default health endpoint.
pub const DEFAULT_HEALTH_PATH: &str = "/system_stats";

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// Path probed with `GET`, e.g. `/system_stats`.
    pub health_path: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("ComfyUI not ready after {waited:?} ({attempts} attempts, last error: {last_error})")]
    TimedOut {
        waited: Duration,
        attempts: u32,
        last_error: String,
    },
}

/// Poll until the health endpoint answers 2xx.
///
/// Returns the number of attempts it took. Returns as soon as the first
/// probe succeeds; never probes after the deadline.
pub async fn wait_until_ready(
    api: &ComfyUIApi,
    config: &ReadinessConfig,
) -> Result<u32, ReadinessError> {
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut attempts = 0u32;
    let mut last_error = String::from("no probe attempted");

    tracing::info!(
        url = %api.api_url(),
        path = %config.health_path,
        interval_ms = config.interval.as_millis() as u64,
        timeout_ms = config.timeout.as_millis() as u64,
        "Waiting for ComfyUI to become ready",
    );

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::error!(attempts, error = %last_error, "ComfyUI readiness deadline exceeded");
            return Err(ReadinessError::TimedOut {
                waited: started.elapsed(),
                attempts,
                last_error,
            });
        }

        attempts += 1;
        match api.probe(&config.health_path, remaining).await {
            Ok(()) => {
                tracing::info!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "ComfyUI is ready",
                );
                return Ok(attempts);
            }
            Err(e) => {
                tracing::debug!(attempt = attempts, error = %e, "ComfyUI not ready yet");
                last_error = e.to_string();
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(config.interval.min(remaining)).await;
    }
}

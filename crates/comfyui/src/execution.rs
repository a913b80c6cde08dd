//! Waiting for a submitted prompt to finish.
//!
//! ComfyUI only adds a prompt to `/history` once it has finished, so
//! completion is detected by polling that endpoint at a fixed interval.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::ComfyUIApi;
use crate::history::HistoryEntry;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Workflow execution timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Workflow execution failed: {0}")]
    Failed(String),
}

/// Poll `/history/{prompt_id}` until the prompt appears.
///
/// Each poll is bounded by the time left before the deadline, so a hung
/// request cannot outlive it. HTTP failures while polling are logged and
/// retried. When the deadline
/// passes the prompt is removed from the queue and the running execution
/// interrupted, both best-effort.
pub async fn wait_for_completion(
    api: &ComfyUIApi,
    prompt_id: &str,
    config: &ExecutionConfig,
) -> Result<HistoryEntry, ExecutionError> {
    let started = Instant::now();

    loop {
        let Some(remaining) = config.timeout.checked_sub(started.elapsed()) else {
            break;
        };
        if remaining.is_zero() {
            break;
        }

        match api.get_history(prompt_id, remaining).await {
            Ok(mut history) => {
                if let Some(entry) = history.remove(prompt_id) {
                    return finish(prompt_id, entry, started.elapsed());
                }
            }
            Err(e) => {
                tracing::warn!(%prompt_id, error = %e, "History poll failed");
            }
        }

        let remaining = config.timeout.saturating_sub(started.elapsed());
        tokio::time::sleep(config.interval.min(remaining)).await;
    }

    tracing::error!(%prompt_id, "Execution deadline exceeded, cancelling");
    if let Err(e) = api.cancel_execution(prompt_id).await {
        tracing::warn!(%prompt_id, error = %e, "Failed to dequeue prompt");
    }
    if let Err(e) = api.interrupt().await {
        tracing::warn!(%prompt_id, error = %e, "Failed to interrupt execution");
    }

    Err(ExecutionError::TimedOut(config.timeout))
}

fn finish(
    prompt_id: &str,
    entry: HistoryEntry,
    elapsed: Duration,
) -> Result<HistoryEntry, ExecutionError> {
    if let Some(status) = entry.status.as_ref().filter(|s| s.is_error()) {
        let message = status
            .error_message()
            .unwrap_or_else(|| "ComfyUI reported an execution error".to_string());
        tracing::error!(%prompt_id, error = %message, "Workflow failed");
        return Err(ExecutionError::Failed(message));
    }

    tracing::info!(
        %prompt_id,
        elapsed_ms = elapsed.as_millis() as u64,
        outputs = entry.outputs.len(),
        "Workflow completed",
    );
    Ok(entry)
}

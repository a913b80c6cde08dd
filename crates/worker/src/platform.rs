//! Serverless platform job loop.
//!
//! Pulls jobs from the platform's job-take endpoint, runs them through the
//! [`JobHandler`] one at a time, and posts each result back. An empty
//! response means there is no work right now.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use liveportrait_core::job::{JobOutput, JobRequest};

use crate::config::PlatformConfig;
use crate::handler::JobHandler;

/// Delay after a failed fetch before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Delay after an empty fetch.
const IDLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed job payload: {0}")]
    MalformedJob(String),
}

/// A job taken from the platform queue.
#[derive(Debug, Clone)]
pub struct PlatformJob {
    pub id: String,
    pub input: serde_json::Value,
}

/// HTTP client for the platform job endpoints.
#[derive(Clone)]
pub struct PlatformClient {
    client: reqwest::Client,
    config: PlatformConfig,
}

impl PlatformClient {
    pub fn new(client: reqwest::Client, config: PlatformConfig) -> Self {
        Self { client, config }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header(AUTHORIZATION, key.as_str()),
            None => request,
        }
    }

    /// Take the next job, if any.
    pub async fn next_job(&self) -> Result<Option<PlatformJob>, PlatformError> {
        let url = self.config.job_get_url.replace("$ID", &self.config.worker_id);
        let response = self.authorize(self.client.get(url)).send().await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(None);
        }

        let request: JobRequest =
            serde_json::from_str(&body).map_err(|e| PlatformError::MalformedJob(e.to_string()))?;
        let id = request
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PlatformError::MalformedJob("job has no id".to_string()))?;

        Ok(Some(PlatformJob {
            id,
            input: request.input,
        }))
    }

    /// Report a job's result.
    ///
    /// Success is posted as `{"output": {...}}`, failure as `{"error": "..."}`.
    /// The URL's `$RUNPOD_POD_ID` becomes the worker id and `$ID` the job id.
    pub async fn post_result(&self, job_id: &str, output: &JobOutput) -> Result<(), PlatformError> {
        let url = self
            .config
            .job_done_url
            .replace("$RUNPOD_POD_ID", &self.config.worker_id)
            .replace("$ID", job_id);
        let body = match output {
            JobOutput::Error(message) => json!({ "error": message }),
            ok => json!({ "output": ok }),
        };

        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Run the job loop until `cancel` fires.
///
/// A job in progress is always finished and reported before the loop
/// observes cancellation.
pub async fn run(client: &PlatformClient, handler: &JobHandler, cancel: CancellationToken) {
    tracing::info!(worker_id = %client.config.worker_id, "Polling platform for jobs");

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = client.next_job() => next,
        };

        let delay = match next {
            Ok(Some(job)) => {
                tracing::info!(job_id = %job.id, "Job received");
                let output = handler.handle(&job.id, job.input).await;
                if let Err(e) = client.post_result(&job.id, &output).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to report job result");
                }
                continue;
            }
            Ok(None) => IDLE_DELAY,
            Err(e) => {
                tracing::warn!(error = %e, "Job fetch failed");
                RETRY_DELAY
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!("Platform job loop stopped");
}

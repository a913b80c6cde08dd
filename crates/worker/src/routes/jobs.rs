//! Synchronous job execution, shaped like the platform's `/runsync`.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{routing::post, Json, Router};
use serde::Serialize;

use liveportrait_core::job::{JobOutput, JobRequest};

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct RunSyncResponse {
    pub id: String,
    pub status: JobStatus,
    pub output: JobOutput,
    pub execution_time_ms: u64,
}

/// POST /runsync -- run a job and wait for its output.
///
/// Job failures still answer 200 with `status: FAILED`; only malformed
/// request bodies are rejected.
async fn run_sync(
    State(state): State<AppState>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> AppResult<Json<RunSyncResponse>> {
    let Json(request) = body?;
    let id = request
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("sync-{}", uuid::Uuid::new_v4()));

    let started = Instant::now();
    let output = state.handler.handle(&id, request.input).await;
    let status = if output.is_error() {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    };

    Ok(Json(RunSyncResponse {
        id,
        status,
        output,
        execution_time_ms: started.elapsed().as_millis() as u64,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/runsync", post(run_sync))
}

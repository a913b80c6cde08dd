use std::time::Duration;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Upper bound on the ComfyUI probe made per health request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether ComfyUI answers its health endpoint.
    pub comfyui_ready: bool,
}

/// GET /health -- returns worker and ComfyUI health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let comfyui_ready = state
        .handler
        .api()
        .probe(&state.config.readiness.health_path, PROBE_TIMEOUT)
        .await
        .is_ok();

    let status = if comfyui_ready { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        comfyui_ready,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

//! In-process fake ComfyUI server for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Knobs and recorded calls for the fake server.
#[derive(Clone)]
pub struct FakeComfy {
    /// Health probes answered with 503 before the first 200.
    pub health_failures: Arc<AtomicU32>,
    pub health_hits: Arc<AtomicU32>,
    /// History polls answered with `{}` before the entry is returned.
    pub pending_polls: Arc<AtomicU32>,
    /// Delay before answering each history poll, in milliseconds.
    pub history_delay_ms: Arc<AtomicU64>,
    /// Entry returned for the prompt once finished; `None` means never.
    pub history_entry: Arc<Mutex<Option<Value>>>,
    /// Body returned by `POST /prompt` with status 200.
    pub prompt_response: Arc<Mutex<Value>>,
    /// When set, `POST /prompt` answers 400.
    pub reject_prompt: Arc<AtomicBool>,
    pub submitted: Arc<Mutex<Vec<Value>>>,
    pub cancelled: Arc<Mutex<Vec<Value>>>,
    pub interrupted: Arc<AtomicBool>,
}

impl Default for FakeComfy {
    fn default() -> Self {
        Self {
            health_failures: Arc::new(AtomicU32::new(0)),
            health_hits: Arc::new(AtomicU32::new(0)),
            pending_polls: Arc::new(AtomicU32::new(0)),
            history_delay_ms: Arc::new(AtomicU64::new(0)),
            history_entry: Arc::new(Mutex::new(None)),
            prompt_response: Arc::new(Mutex::new(json!({"prompt_id": "p-1", "number": 0}))),
            reject_prompt: Arc::new(AtomicBool::new(false)),
            submitted: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }
}

async fn system_stats(State(fake): State<FakeComfy>) -> Response {
    fake.health_hits.fetch_add(1, Ordering::SeqCst);
    let remaining = fake.health_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        fake.health_failures.store(remaining - 1, Ordering::SeqCst);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({"system": {"os": "posix"}, "devices": []})).into_response()
}

async fn prompt(State(fake): State<FakeComfy>, Json(body): Json<Value>) -> Response {
    fake.submitted.lock().unwrap().push(body);
    if fake.reject_prompt.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"type": "prompt_outputs_failed_validation"}})),
        )
            .into_response();
    }
    Json(fake.prompt_response.lock().unwrap().clone()).into_response()
}

async fn history(State(fake): State<FakeComfy>, Path(id): Path<String>) -> Json<Value> {
    let delay = fake.history_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let pending = fake.pending_polls.load(Ordering::SeqCst);
    if pending > 0 {
        fake.pending_polls.store(pending - 1, Ordering::SeqCst);
        return Json(json!({}));
    }
    let entry = fake.history_entry.lock().unwrap().clone();
    let mut body = serde_json::Map::new();
    if let Some(entry) = entry {
        body.insert(id, entry);
    }
    Json(Value::Object(body))
}

async fn queue(State(fake): State<FakeComfy>, Json(body): Json<Value>) -> StatusCode {
    fake.cancelled.lock().unwrap().push(body);
    StatusCode::OK
}

async fn interrupt(State(fake): State<FakeComfy>) -> StatusCode {
    fake.interrupted.store(true, Ordering::SeqCst);
    StatusCode::OK
}

/// Start the fake on an ephemeral port and return its base URL.
pub async fn spawn(fake: FakeComfy) -> String {
    let app = Router::new()
        .route("/system_stats", get(system_stats))
        .route("/prompt", post(prompt))
        .route("/history/{id}", get(history))
        .route("/queue", post(queue))
        .route("/interrupt", post(interrupt))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// A base URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

//! Shared fixtures for worker integration tests: a fake ComfyUI that
//! "renders" a video into a temp output directory, and router helpers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get as get_route, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use liveportrait_comfyui::api::ComfyUIApi;
use liveportrait_comfyui::execution::ExecutionConfig;
use liveportrait_comfyui::readiness::ReadinessConfig;
use liveportrait_worker::config::{WorkerConfig, WorkerMode};
use liveportrait_worker::handler::{HandlerConfig, JobHandler};
use liveportrait_worker::router::build_app_router;
use liveportrait_worker::state::AppState;

/// Bytes written as the rendered video.
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42fake";

/// One 1x1 PNG, base64.
pub const PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

/// Fake ComfyUI backed by a real output directory.
#[derive(Clone)]
pub struct FakeComfy {
    pub output_dir: PathBuf,
    /// Report the rendered file in `/history`; otherwise only write it.
    pub report_in_history: Arc<AtomicBool>,
    /// Finish every prompt with an execution error.
    pub fail_execution: Arc<AtomicBool>,
    pub healthy: Arc<AtomicBool>,
    /// Delay before answering `POST /prompt`, in milliseconds.
    pub prompt_delay_ms: Arc<AtomicU64>,
    /// Delay before answering each history poll, in milliseconds.
    pub history_delay_ms: Arc<AtomicU64>,
    pub submitted: Arc<Mutex<Vec<Value>>>,
    /// Bodies posted to `/queue`.
    pub cancelled: Arc<Mutex<Vec<Value>>>,
    /// Filename of the last rendered video, keyed by prompt.
    rendered: Arc<Mutex<Option<String>>>,
}

impl FakeComfy {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            report_in_history: Arc::new(AtomicBool::new(true)),
            fail_execution: Arc::new(AtomicBool::new(false)),
            healthy: Arc::new(AtomicBool::new(true)),
            prompt_delay_ms: Arc::new(AtomicU64::new(0)),
            history_delay_ms: Arc::new(AtomicU64::new(0)),
            submitted: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            rendered: Arc::new(Mutex::new(None)),
        }
    }

    /// The workflow graph of the most recent submission.
    pub fn last_workflow(&self) -> Value {
        self.submitted.lock().unwrap().last().unwrap()["prompt"].clone()
    }
}

async fn system_stats(State(fake): State<FakeComfy>) -> Response {
    if fake.healthy.load(Ordering::SeqCst) {
        Json(json!({"system": {}, "devices": []})).into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn delay(millis: &AtomicU64) {
    let ms = millis.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

async fn prompt(State(fake): State<FakeComfy>, Json(body): Json<Value>) -> Json<Value> {
    delay(&fake.prompt_delay_ms).await;
    let prefix = body["prompt"]["7"]["inputs"]["filename_prefix"]
        .as_str()
        .unwrap_or("liveportrait_output")
        .to_string();
    let filename = format!("{prefix}_00001.mp4");
    std::fs::create_dir_all(&fake.output_dir).unwrap();
    std::fs::write(fake.output_dir.join(&filename), VIDEO_BYTES).unwrap();

    *fake.rendered.lock().unwrap() = Some(filename);
    fake.submitted.lock().unwrap().push(body);
    Json(json!({"prompt_id": "p-42", "number": 1}))
}

async fn history(State(fake): State<FakeComfy>, UrlPath(id): UrlPath<String>) -> Json<Value> {
    delay(&fake.history_delay_ms).await;
    let outputs = match fake.rendered.lock().unwrap().clone() {
        Some(filename) if fake.report_in_history.load(Ordering::SeqCst) => json!({
            "7": {"gifs": [{"filename": filename, "subfolder": "", "type": "output"}]}
        }),
        _ => json!({}),
    };
    let status = if fake.fail_execution.load(Ordering::SeqCst) {
        json!({
            "status_str": "error",
            "completed": false,
            "messages": [["execution_error", {"exception_message": "CUDA out of memory"}]]
        })
    } else {
        json!({"status_str": "success", "completed": true, "messages": []})
    };

    let mut body = serde_json::Map::new();
    body.insert(id, json!({"outputs": outputs, "status": status}));
    Json(Value::Object(body))
}

async fn queue(State(fake): State<FakeComfy>, Json(body): Json<Value>) -> StatusCode {
    fake.cancelled.lock().unwrap().push(body);
    StatusCode::OK
}

/// Start the fake on an ephemeral port and return its base URL.
pub async fn spawn(fake: FakeComfy) -> String {
    let app = Router::new()
        .route("/system_stats", get_route(system_stats))
        .route("/prompt", post(prompt))
        .route("/history/{id}", get_route(history))
        .route("/queue", post(queue))
        .route("/interrupt", post(|| async { StatusCode::OK }))
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

/// Fast polling so tests finish quickly.
pub fn fast_execution() -> ExecutionConfig {
    ExecutionConfig {
        interval: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
    }
}

/// Handler wired to `comfyui_url` with ComfyUI's directories under `root`.
pub fn build_handler(comfyui_url: &str, root: &Path) -> JobHandler {
    let http = reqwest::Client::new();
    JobHandler::new(
        ComfyUIApi::with_client(http.clone(), comfyui_url),
        http,
        HandlerConfig {
            input_dir: root.join("input"),
            output_dir: root.join("output"),
            execution: fast_execution(),
        },
    )
}

/// Build a test `WorkerConfig` pointing at `comfyui_url` and `root`.
pub fn test_config(comfyui_url: &str, root: &Path) -> WorkerConfig {
    WorkerConfig {
        comfyui_dir: root.to_path_buf(),
        comfyui_url: comfyui_url.to_string(),
        launch_cmd: vec!["true".to_string()],
        comfyui_external: true,
        readiness: ReadinessConfig::default(),
        execution: fast_execution(),
        mode: WorkerMode::Serve,
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        platform: None,
    }
}

/// Build the full application router, as `main.rs` does.
pub fn build_test_app(comfyui_url: &str, root: &Path) -> Router {
    let config = test_config(comfyui_url, root);
    let handler = build_handler(comfyui_url, root);
    build_app_router(AppState {
        config: Arc::new(config),
        handler: Arc::new(handler),
    })
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &str) -> Response {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A valid job input using inline media.
pub fn job_input() -> Value {
    json!({
        "source_image": format!("data:image/png;base64,{PNG_B64}"),
        "driving_video": "AAAAGGZ0eXBtcDQy",
    })
}

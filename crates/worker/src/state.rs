use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::handler::JobHandler;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Worker configuration (health path, timeouts).
    pub config: Arc<WorkerConfig>,
    /// Job handler bound to the local ComfyUI instance.
    pub handler: Arc<JobHandler>,
}

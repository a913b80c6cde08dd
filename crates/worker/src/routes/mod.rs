//! HTTP routes of the local worker API.
//!
//! ```text
//! GET  /health      worker + ComfyUI health
//! POST /runsync     run one job and wait for its output
//! ```

pub mod health;
pub mod jobs;

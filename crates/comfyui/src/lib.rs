//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, typed execution history, the startup
//! readiness probe and completion polling used by the LivePortrait
//! worker to drive a local ComfyUI server.

pub mod api;
pub mod execution;
pub mod history;
pub mod readiness;

//! Domain types for the LivePortrait serverless worker.
//!
//! Everything here is free of network I/O: job envelopes, inline media
//! decoding, the ComfyUI workflow graph, and output video selection.

pub mod error;
pub mod job;
pub mod media;
pub mod output;
pub mod workflow;

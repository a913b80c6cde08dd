//! LivePortrait serverless worker library.
//!
//! Exposes the building blocks (config, supervisor, job handler, HTTP
//! routes, platform job loop) so integration tests and the binary
//! entrypoint can both access them.

pub mod config;
pub mod error;
pub mod handler;
pub mod platform;
pub mod router;
pub mod routes;
pub mod staging;
pub mod state;
pub mod supervisor;

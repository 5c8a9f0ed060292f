//! Axum HTTP API server.
//!
//! This crate provides:
//! - Upload intents with presigned object-store writes
//! - Upload completion, which dispatches the first pipeline step
//! - Media status reads
//! - Health, readiness and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

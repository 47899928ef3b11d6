//! Metric Relay Library
//!
//! Peer-to-peer relay for periodic kernel metric samples. Each process runs a
//! relay, a client agent feeding it, and, when its discovery port is free,
//! the discovery authority that tells every relay who its peers are.

pub mod agent;
pub mod api;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod sample;
pub mod shutdown;
pub mod telemetry;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::api::AppState;

pub use crate::config::Config;
pub use crate::error::{AppError, AppResult};
pub use crate::node::{IntervalControl, Node, NodeHandle};

/// Create the inspection router with the given state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        // Peers
        .route("/api/peers", get(api::peers::list))
        // Samples
        .route("/api/metrics/latest", get(api::metrics::latest))
        // Prometheus
        .route("/metrics", get(api::metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

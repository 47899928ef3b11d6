use axum::{extract::State, response::IntoResponse};

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::sample::BoardEntry;

/// Prometheus metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = match &state.metrics {
        Some(handle) => handle.render(),
        // No recorder installed in this process
        None => format!(
            "# HELP metric_relay_info metric-relay build info\n\
             # TYPE metric_relay_info gauge\n\
             metric_relay_info{{version=\"{}\"}} 1\n",
            env!("CARGO_PKG_VERSION")
        ),
    };

    ([("content-type", "text/plain; charset=utf-8")], body)
}

/// Latest parsed sample per source
pub async fn latest(State(state): State<AppState>) -> ApiResponse<Vec<BoardEntry>> {
    let entries = state.board.read().await.entries();
    ApiResponse::success(entries)
}

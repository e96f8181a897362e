use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// Prometheus exposition of the process metrics.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

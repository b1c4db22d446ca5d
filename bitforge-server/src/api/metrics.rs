//! Metrics API Handler

use axum::{extract::State, http::header, response::IntoResponse};

use super::AppState;
use super::error::{ApiError, ApiResult};

/// GET /metrics
///
/// Prometheus text exposition of the compilation metrics
pub async fn render_metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("Metrics are not enabled".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

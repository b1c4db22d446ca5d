//! Health Check API Handler

use axum::{http::StatusCode, response::IntoResponse};

/// GET /health
///
/// Liveness probe; does not touch the toolchain.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

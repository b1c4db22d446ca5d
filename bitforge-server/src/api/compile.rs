//! Compile API Handler
//!
//! Streams one compilation as Server-Sent Events. Each pipeline event is
//! sent as a single `data:` frame holding its JSON form.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, Sse},
    },
};
use bitforge_core::dto::compile::CompileRequest;
use bitforge_runner::spawn_compile;
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;

use super::AppState;
use super::error::{ApiError, ApiResult};

/// POST /api/compile
///
/// Starts a compilation and streams its events. The body is validated up
/// front; after that every failure arrives as a terminal `error` event.
///
/// The run's cancellation token is owned by the response stream: when the
/// client disconnects, the stream is dropped and the run is cancelled.
pub async fn compile(
    State(state): State<AppState>,
    payload: Result<Json<CompileRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!("Invalid compile request: {}", rejection.body_text());
        ApiError::BadRequest("Invalid request body".to_string())
    })?;

    tracing::info!(
        top_module = %request.top_module,
        sources = request.sources.len(),
        "Compile request accepted"
    );

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let rx = spawn_compile(state.service.clone(), request, cancel, state.event_buffer);

    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((SseEvent::default().json_data(&event), (rx, guard)))
    });

    Ok(Sse::new(events))
}

/// OPTIONS /api/compile
///
/// Plain OPTIONS requests; real preflights are answered by the CORS layer.
pub async fn preflight() -> impl IntoResponse {
    StatusCode::OK
}

//! API Module
//!
//! HTTP API layer for the compilation server.
//! Each submodule handles one endpoint family.

pub mod compile;
pub mod error;
pub mod health;
pub mod metrics;

use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use bitforge_runner::CompileService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn CompileService>,
    pub metrics: Option<PrometheusHandle>,
    /// Capacity of the per-request event channel
    pub event_buffer: usize,
}

impl AppState {
    pub fn new(service: Arc<dyn CompileService>, event_buffer: usize) -> Self {
        Self {
            service,
            metrics: None,
            event_buffer,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Compilation stream
        .route(
            "/api/compile",
            post(compile::compile).options(compile::preflight),
        )
        // Prometheus scrape target
        .route("/metrics", get(metrics::render_metrics))
        // Add state and middleware
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

//! API route definitions

use crate::engine::Engine;
use crate::system::SystemMonitor;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub system: SystemMonitor,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Host and fleet views
        .route("/api/services", get(handlers::list_services))
        .route("/api/gpu", get(handlers::list_gpus))
        .route("/api/system", get(handlers::system))
        // Per-service operations
        .route(
            "/api/service/{key}/config",
            get(handlers::get_config).post(handlers::save_config),
        )
        .route("/api/service/{key}/start", post(handlers::start_service))
        .route("/api/service/{key}/stop", post(handlers::stop_service))
        .route("/api/service/{key}/logs", get(handlers::service_logs))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

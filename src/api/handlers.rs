//! API request handlers

use super::models::{
    ApiInfo, HealthResponse, LogsQuery, LogsResponse, SaveConfigRequest, SaveConfigResponse,
    ServiceConfigResponse, StartRequest, StartResponse, StopResponse,
};
use super::routes::AppState;
use crate::engine::{StartOutcome, StopOutcome};
use crate::error::ManagerError;
use crate::gpu::GpuDeviceInfo;
use crate::logs::{self, LogTail};
use crate::snapshot::ServiceSummary;
use crate::system::SystemSnapshot;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::collections::BTreeMap;

/// GET / - API descriptor
pub async fn index() -> Json<ApiInfo> {
    let endpoints = [
        ("services", "/api/services"),
        ("gpu", "/api/gpu"),
        ("system", "/api/system"),
        ("config", "/api/service/{key}/config"),
        ("start", "/api/service/{key}/start"),
        ("stop", "/api/service/{key}/stop"),
        ("logs", "/api/service/{key}/logs"),
        ("metrics", "/metrics"),
    ]
    .into_iter()
    .map(|(name, path)| (name.to_string(), path.to_string()))
    .collect();

    Json(ApiInfo {
        name: "vLLM Manager API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints,
    })
}

/// GET /health - Manager health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /api/services - Every configured service with its live status
pub async fn list_services(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, ServiceSummary>> {
    Json(state.engine.list_service_statuses().await)
}

/// GET /api/gpu - GPU devices, empty when no GPU data is available
pub async fn list_gpus(State(state): State<AppState>) -> Json<Vec<GpuDeviceInfo>> {
    Json(state.engine.list_gpu_devices().await)
}

/// GET /api/system - Host resource summary
pub async fn system(State(state): State<AppState>) -> Result<Json<SystemSnapshot>, ManagerError> {
    Ok(Json(state.system.snapshot().await?))
}

/// GET /api/service/{key}/config
pub async fn get_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ServiceConfigResponse>, ManagerError> {
    let view = state.engine.get_service_config(&key).await?;

    Ok(Json(ServiceConfigResponse {
        success: true,
        config: view.params,
        model_path: view.model_path.unwrap_or_default(),
        extra_args: view.extra_args,
    }))
}

/// POST /api/service/{key}/config
pub async fn save_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SaveConfigRequest>,
) -> Result<Json<SaveConfigResponse>, ManagerError> {
    let config = state.engine.save_service_config(&key, &req.params).await?;

    Ok(Json(SaveConfigResponse {
        success: true,
        message: format!("Default configuration for '{key}' saved"),
        config,
    }))
}

/// POST /api/service/{key}/start - Body is optional; absent fields use the
/// stored defaults
pub async fn start_service(
    State(state): State<AppState>,
    Path(key): Path<String>,
    req: Option<Json<StartRequest>>,
) -> Result<Json<StartResponse>, ManagerError> {
    let req = req.map(|Json(req)| req).unwrap_or_default();

    let outcome = state
        .engine
        .start(&key, Some(req.params), req.save_as_default)
        .await?;

    let tag = outcome.tag().to_string();
    let response = match outcome {
        StartOutcome::Started { output, params } => StartResponse {
            success: true,
            outcome: tag,
            message: format!("Service '{key}' started"),
            output: Some(output),
            params,
            pid: None,
        },
        StartOutcome::StartingInBackground { params } => StartResponse {
            success: true,
            outcome: tag,
            message: format!("Service '{key}' is starting in the background"),
            output: None,
            params,
            pid: None,
        },
        StartOutcome::AlreadyRunning { pid } => StartResponse {
            success: false,
            outcome: tag,
            message: format!("Service '{key}' is already running"),
            output: None,
            params: None,
            pid: Some(pid),
        },
    };

    Ok(Json(response))
}

/// POST /api/service/{key}/stop
pub async fn stop_service(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<StopResponse>, ManagerError> {
    let outcome = state.engine.stop(&key).await?;

    let tag = outcome.tag().to_string();
    let response = match outcome {
        StopOutcome::Stopped { output } => StopResponse {
            success: true,
            outcome: tag,
            message: format!("Service '{key}' stopped"),
            output: Some(output),
        },
        StopOutcome::NotRunning => StopResponse {
            success: false,
            outcome: tag,
            message: format!("Service '{key}' is not running"),
            output: None,
        },
    };

    Ok(Json(response))
}

/// GET /api/service/{key}/logs?lines=N
pub async fn service_logs(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ManagerError> {
    let lines = logs::clamp_lines(query.lines);

    let response = match state.engine.tail_logs(&key, lines).await? {
        LogTail::Lines { path, content } => LogsResponse {
            success: true,
            path: path.display().to_string(),
            logs: Some(content),
            message: None,
        },
        LogTail::Missing { path } => LogsResponse {
            success: false,
            message: Some(format!("Log file {} does not exist", path.display())),
            path: path.display().to_string(),
            logs: None,
        },
    };

    Ok(Json(response))
}

//! Error taxonomy for manager operations and its API mapping

use crate::params::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Failures surfaced by the engine and boundary operations.
///
/// "Already running" and "not running" are not errors; they are reported
/// through [`crate::engine::StartOutcome`] and [`crate::engine::StopOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("service '{key}' not found")]
    NotFound { key: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("launch failed: {message}")]
    Launch { message: String, stderr: String },

    #[error("stop failed: {message}")]
    Stop { message: String, stderr: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ManagerError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let mut body = ErrorResponse {
            success: false,
            message: self.to_string(),
            field: None,
            expected: None,
            error: None,
            timestamp: chrono::Utc::now(),
        };

        let status = match self {
            ManagerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ManagerError::Validation(err) => {
                body.field = Some(err.field);
                body.expected = Some(err.expected);
                StatusCode::BAD_REQUEST
            }
            ManagerError::Config { .. } => StatusCode::BAD_REQUEST,
            ManagerError::Launch { stderr, .. } | ManagerError::Stop { stderr, .. } => {
                tracing::error!(message = %body.message, "Service command failed");
                body.error = Some(stderr);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ManagerError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ManagerError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                body.message = "Internal server error".to_string();
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

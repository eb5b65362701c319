//! API request and response models

use crate::params::{LaunchParams, LaunchParamsInput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// API descriptor served at `/`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiInfo {
    pub name: String,
    pub version: String,
    pub endpoints: BTreeMap<String, String>,
}

/// Stored defaults of a service
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceConfigResponse {
    pub success: bool,
    pub config: LaunchParams,
    pub model_path: String,
    pub extra_args: String,
}

/// Body of `POST /api/service/{key}/config`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SaveConfigRequest {
    #[serde(default)]
    pub params: LaunchParamsInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveConfigResponse {
    pub success: bool,
    pub message: String,
    pub config: LaunchParams,
}

/// Body of `POST /api/service/{key}/start`; every field is optional
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(flatten)]
    pub params: LaunchParamsInput,

    #[serde(default, alias = "saveAsDefault")]
    pub save_as_default: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    pub outcome: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<LaunchParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    pub outcome: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

/// Tail of a service log. A missing file is reported, not an error
#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub success: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

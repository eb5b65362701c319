//! Runtime status snapshots. Recomputed on every query, never stored

use crate::params::LaunchParams;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Live details of a running service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningProcess {
    pub pid: u32,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub port_accessible: bool,
    /// None when GPU attribution is unavailable
    pub gpu_memory_mb: Option<f64>,
    #[serde(rename = "uptime")]
    pub started_at: DateTime<Utc>,
}

/// Authoritative status of a service at query time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RuntimeSnapshot {
    Stopped,
    Running(RunningProcess),
    Error { message: String },
}

impl RuntimeSnapshot {
    pub fn is_running(&self) -> bool {
        matches!(self, RuntimeSnapshot::Running(_))
    }

    /// Wire name of the state
    pub fn state(&self) -> &'static str {
        match self {
            RuntimeSnapshot::Stopped => "stopped",
            RuntimeSnapshot::Running(_) => "running",
            RuntimeSnapshot::Error { .. } => "error",
        }
    }
}

/// A service's configuration summary merged with its live status
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub port: u16,
    pub gpus: Vec<u32>,
    pub default_params: LaunchParams,
    #[serde(flatten)]
    pub runtime: RuntimeSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_serialization() {
        let json = serde_json::to_value(RuntimeSnapshot::Stopped).unwrap();
        assert_eq!(json, serde_json::json!({"status": "stopped"}));
    }

    #[test]
    fn test_running_serialization() {
        let snapshot = RuntimeSnapshot::Running(RunningProcess {
            pid: 4242,
            cpu_percent: 3.5,
            memory_mb: 1024.0,
            port_accessible: true,
            gpu_memory_mb: None,
            started_at: Utc::now(),
        });
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["pid"], 4242);
        assert_eq!(json["port_accessible"], true);
        assert!(json["gpu_memory_mb"].is_null());
        assert!(json["uptime"].is_string());
    }

    #[test]
    fn test_summary_flattens_runtime() {
        let summary = ServiceSummary {
            name: "Model X".to_string(),
            port: 8000,
            gpus: vec![0, 1],
            default_params: LaunchParams::fallback(8000, &[0, 1]),
            runtime: RuntimeSnapshot::Error {
                message: "boom".to_string(),
            },
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["default_params"]["port"], 8000);
        assert_eq!(json["gpus"], serde_json::json!([0, 1]));
    }
}

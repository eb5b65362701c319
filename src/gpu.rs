//! GPU metrics via nvidia-smi
//!
//! Every query is issued fresh with a short timeout. A missing driver, a
//! non-zero exit or a timeout all degrade to "no GPU data" rather than an
//! error: callers get an empty device list or no per-process memory.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEVICE_QUERY: &str = "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw,power.limit";
const COMPUTE_APPS_QUERY: &str = "--query-compute-apps=pid,used_memory";
const CSV_FORMAT: &str = "--format=csv,noheader,nounits";

/// Device-level metrics for one physical GPU.
///
/// Fields the driver reports as `[N/A]` are `None`, which keeps "unknown"
/// distinct from a real zero reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuDeviceInfo {
    pub index: u32,
    pub name: String,
    #[serde(rename = "utilization")]
    pub utilization_percent: Option<f64>,
    #[serde(rename = "memory_used")]
    pub memory_used_mb: Option<f64>,
    #[serde(rename = "memory_total")]
    pub memory_total_mb: Option<f64>,
    #[serde(rename = "temperature")]
    pub temperature_c: Option<f64>,
    #[serde(rename = "power_draw")]
    pub power_draw_w: Option<f64>,
    #[serde(rename = "power_limit")]
    pub power_limit_w: Option<f64>,
}

/// Queries the GPU management interface
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// All visible devices; empty when GPU data is unavailable
    async fn list_devices(&self) -> Vec<GpuDeviceInfo>;

    /// GPU memory (MiB) attributed to `pid`, if any
    async fn memory_for_process(&self, pid: u32) -> Option<f64>;
}

/// GPU probe that shells out to `nvidia-smi`
pub struct NvidiaSmiProbe {
    binary: String,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run a CSV query, returning stdout only on a successful exit
    async fn query(&self, query: &str) -> Option<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(query)
            .arg(CSV_FORMAT)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => {
                tracing::debug!(
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "nvidia-smi query failed"
                );
                None
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, binary = %self.binary, "Failed to run nvidia-smi");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "nvidia-smi query timed out"
                );
                None
            }
        }
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn list_devices(&self) -> Vec<GpuDeviceInfo> {
        self.query(DEVICE_QUERY)
            .await
            .map(|stdout| parse_devices(&stdout))
            .unwrap_or_default()
    }

    async fn memory_for_process(&self, pid: u32) -> Option<f64> {
        let stdout = self.query(COMPUTE_APPS_QUERY).await?;
        parse_process_memory(&stdout, pid)
    }
}

/// Parse a numeric field, treating `[N/A]`, `N/A` and garbage as unknown
fn parse_metric(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn split_csv(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// Parse `--query-gpu` output. Malformed lines are skipped
pub fn parse_devices(stdout: &str) -> Vec<GpuDeviceInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parts = split_csv(line);
            if parts.len() < 8 {
                return None;
            }
            Some(GpuDeviceInfo {
                index: parts[0].parse().ok()?,
                name: parts[1].to_string(),
                utilization_percent: parse_metric(parts[2]),
                memory_used_mb: parse_metric(parts[3]),
                memory_total_mb: parse_metric(parts[4]),
                temperature_c: parse_metric(parts[5]),
                power_draw_w: parse_metric(parts[6]),
                power_limit_w: parse_metric(parts[7]),
            })
        })
        .collect()
}

/// Parse `--query-compute-apps` output and pick the entry for `pid`
pub fn parse_process_memory(stdout: &str, pid: u32) -> Option<f64> {
    let pid = pid.to_string();
    stdout.lines().find_map(|line| {
        let parts = split_csv(line);
        match parts.as_slice() {
            [p, used, ..] if *p == pid => parse_metric(used),
            _ => None,
        }
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        let stdout = "0, NVIDIA A100-SXM4-80GB, 87, 71234, 81920, 64, 312.45, 400.00\n\
                      1, NVIDIA A100-SXM4-80GB, 0, 4, 81920, 31, 55.10, 400.00\n";
        let devices = parse_devices(stdout);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].name, "NVIDIA A100-SXM4-80GB");
        assert_eq!(devices[0].utilization_percent, Some(87.0));
        assert_eq!(devices[0].memory_used_mb, Some(71234.0));
        assert_eq!(devices[0].power_draw_w, Some(312.45));
        assert_eq!(devices[1].utilization_percent, Some(0.0));
    }

    #[test]
    fn test_parse_devices_not_available_fields() {
        let stdout = "0, Tesla T4, [N/A], 100, 15360, 40, [N/A], N/A\n";
        let devices = parse_devices(stdout);

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].utilization_percent, None);
        assert_eq!(devices[0].power_draw_w, None);
        assert_eq!(devices[0].power_limit_w, None);
        assert_eq!(devices[0].memory_total_mb, Some(15360.0));
    }

    #[test]
    fn test_parse_devices_skips_malformed() {
        let stdout = "garbage line\n\n0, GPU, 1, 2, 3, 4, 5, 6\nx, GPU, 1, 2, 3, 4, 5, 6\n";
        let devices = parse_devices(stdout);
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn test_parse_process_memory() {
        let stdout = "4242, 70500\n5151, 1024\n";
        assert_eq!(parse_process_memory(stdout, 5151), Some(1024.0));
        assert_eq!(parse_process_memory(stdout, 4242), Some(70500.0));
        assert_eq!(parse_process_memory(stdout, 42), None);
        assert_eq!(parse_process_memory("", 42), None);
    }

    #[test]
    fn test_parse_process_memory_exact_pid_match() {
        // 42 must not match 4242
        assert_eq!(parse_process_memory("4242, 100\n", 42), None);
    }

    #[test]
    fn test_serialized_field_names() {
        let device = GpuDeviceInfo {
            index: 0,
            name: "GPU".to_string(),
            utilization_percent: None,
            memory_used_mb: Some(1.0),
            memory_total_mb: Some(2.0),
            temperature_c: Some(30.0),
            power_draw_w: None,
            power_limit_w: None,
        };
        let json = serde_json::to_value(&device).unwrap();
        assert!(json["utilization"].is_null());
        assert_eq!(json["memory_used"], 1.0);
        assert_eq!(json["temperature"], 30.0);
    }

    #[tokio::test]
    async fn test_missing_binary_degrades_to_empty() {
        let probe = NvidiaSmiProbe::new(
            "/nonexistent/nvidia-smi-binary",
            Duration::from_secs(1),
        );
        assert!(probe.list_devices().await.is_empty());
        assert_eq!(probe.memory_for_process(1).await, None);
    }
}

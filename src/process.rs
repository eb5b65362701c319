//! Process discovery and per-process resource sampling

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// Resource usage of a live process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessMetrics {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The process exited after it was discovered
    #[error("process {0} not found")]
    NotFound(u32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Resolves a service's identity to a live OS process
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    /// First process whose full command line matches `pattern`
    async fn find_process(&self, pattern: &Regex) -> Result<Option<u32>>;

    /// CPU, memory and start time of `pid`, sampled over a short interval
    async fn process_metrics(&self, pid: u32) -> Result<ProcessMetrics, MetricsError>;
}

/// Process probe backed by the OS process table
pub struct SystemProcessProbe {
    sample_interval: Duration,
}

impl SystemProcessProbe {
    pub fn new(sample_interval: Duration) -> Self {
        Self { sample_interval }
    }
}

#[async_trait]
impl ProcessProbe for SystemProcessProbe {
    async fn find_process(&self, pattern: &Regex) -> Result<Option<u32>> {
        let pattern = pattern.clone();
        tokio::task::spawn_blocking(move || scan_processes(&pattern))
            .await
            .context("Process scan task failed")
    }

    async fn process_metrics(&self, pid: u32) -> Result<ProcessMetrics, MetricsError> {
        let interval = self.sample_interval;
        tokio::task::spawn_blocking(move || sample_process(pid, interval))
            .await
            .context("Process sampling task failed")?
    }
}

/// Match against every process's command line, excluding our own.
///
/// Ties resolve to the lowest PID, which is the order `/proc` enumerates
/// processes in. With several matching processes the choice is arbitrary
/// from the caller's point of view.
fn scan_processes(pattern: &Regex) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    let own_pid = std::process::id();

    system
        .processes()
        .iter()
        .filter(|(pid, _)| pid.as_u32() != own_pid)
        .filter_map(|(pid, process)| {
            let cmd = process.cmd();
            if cmd.is_empty() {
                return None;
            }
            let cmdline = cmd
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            pattern.is_match(&cmdline).then_some(pid.as_u32())
        })
        .min()
}

fn sample_process(pid: u32, interval: Duration) -> Result<ProcessMetrics, MetricsError> {
    let sys_pid = Pid::from_u32(pid);
    let kind = || ProcessRefreshKind::nothing().with_cpu().with_memory();
    let mut system = System::new();

    // CPU usage is the delta between two refreshes
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[sys_pid]), true, kind());
    if system.process(sys_pid).is_none() {
        return Err(MetricsError::NotFound(pid));
    }

    std::thread::sleep(interval);
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[sys_pid]), true, kind());

    let process = system.process(sys_pid).ok_or(MetricsError::NotFound(pid))?;

    let start_secs = i64::try_from(process.start_time()).unwrap_or_default();
    let started_at = DateTime::from_timestamp(start_secs, 0)
        .with_context(|| format!("Invalid start time for process {pid}"))?;

    Ok(ProcessMetrics {
        cpu_percent: f64::from(process.cpu_usage()),
        memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
        started_at,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_match_for_unique_pattern() {
        let probe = SystemProcessProbe::new(Duration::from_millis(10));
        let pattern = Regex::new("no-such-process-7f3a9c1e-pattern").unwrap();
        assert_eq!(probe.find_process(&pattern).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_metrics_for_missing_pid() {
        let probe = SystemProcessProbe::new(Duration::from_millis(10));
        let result = probe.process_metrics(u32::MAX - 1).await;
        assert!(matches!(result, Err(MetricsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_metrics_for_self() {
        let probe = SystemProcessProbe::new(Duration::from_millis(10));
        let metrics = probe.process_metrics(std::process::id()).await.unwrap();
        assert!(metrics.memory_mb > 0.0);
        assert!(metrics.started_at <= Utc::now());
    }
}

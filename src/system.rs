//! Host-wide resource summary

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, System};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub disk_percent: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
}

/// Capacity of one mounted filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
struct MountUsage {
    mount_point: PathBuf,
    total: u64,
    available: u64,
}

/// Samples CPU, memory and the disk holding `disk_path`
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    cpu_sample: Duration,
    disk_path: PathBuf,
}

impl SystemMonitor {
    pub fn new(cpu_sample: Duration, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            cpu_sample,
            disk_path: disk_path.into(),
        }
    }

    /// Blocks for the CPU sampling interval on a worker thread
    pub async fn snapshot(&self) -> Result<SystemSnapshot> {
        let monitor = self.clone();
        tokio::task::spawn_blocking(move || monitor.collect())
            .await
            .context("System sampling task failed")
    }

    fn collect(&self) -> SystemSnapshot {
        let mut sys = System::new();

        // CPU usage is the delta between two refreshes
        sys.refresh_cpu_usage();
        std::thread::sleep(self.cpu_sample.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let memory_total = sys.total_memory();
        let memory_used = sys.used_memory();

        let disks = Disks::new_with_refreshed_list();
        let mounts: Vec<MountUsage> = disks
            .list()
            .iter()
            .map(|disk| MountUsage {
                mount_point: disk.mount_point().to_path_buf(),
                total: disk.total_space(),
                available: disk.available_space(),
            })
            .collect();

        let (disk_total, disk_used) = mount_for(&self.disk_path, &mounts).map_or((0, 0), |m| {
            (m.total, m.total.saturating_sub(m.available))
        });

        SystemSnapshot {
            cpu_percent: f64::from(sys.global_cpu_usage()),
            memory_percent: percent(memory_used, memory_total),
            memory_used_gb: memory_used as f64 / GIB,
            memory_total_gb: memory_total as f64 / GIB,
            disk_percent: percent(disk_used, disk_total),
            disk_used_gb: disk_used as f64 / GIB,
            disk_total_gb: disk_total as f64 / GIB,
        }
    }
}

/// Mount with the longest mount point that contains `path`
fn mount_for<'a>(path: &Path, mounts: &'a [MountUsage]) -> Option<&'a MountUsage> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.as_os_str().len())
}

/// Returns 0 if total is 0 to avoid division by zero
fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(point: &str, total: u64, available: u64) -> MountUsage {
        MountUsage {
            mount_point: PathBuf::from(point),
            total,
            available,
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(300, 200), 100.0);
    }

    #[test]
    fn test_mount_for_prefers_longest_prefix() {
        let mounts = vec![mount("/", 100, 50), mount("/data", 1000, 10)];

        let root = mount_for(Path::new("/"), &mounts).unwrap();
        assert_eq!(root.total, 100);

        let data = mount_for(Path::new("/data/models"), &mounts).unwrap();
        assert_eq!(data.total, 1000);

        // Component-wise prefix: /database is not under /data
        let other = mount_for(Path::new("/database"), &mounts).unwrap();
        assert_eq!(other.total, 100);
    }

    #[test]
    fn test_mount_for_none() {
        assert!(mount_for(Path::new("/"), &[]).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_reports_memory() {
        let monitor = SystemMonitor::new(Duration::from_millis(10), "/");
        let snapshot = monitor.snapshot().await.unwrap();
        assert!(snapshot.memory_total_gb > 0.0);
        assert!((0.0..=100.0).contains(&snapshot.memory_percent));
    }
}

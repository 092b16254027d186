//! Host resource sampling used to gate new scraping work

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Disks, System};
use tracing::{debug, warn};

/// Go/no-go signal consulted before each page fetch, plus free disk space for
/// the staging volume
pub trait ResourceMonitor: Send + Sync {
    /// False when memory or CPU usage exceeds its threshold
    fn healthy(&self) -> bool;

    /// Free bytes on the volume holding `path`, `None` when it cannot be determined
    fn free_disk_space(&self, path: &Path) -> Option<u64>;
}

/// Monitor backed by `sysinfo`.
///
/// CPU usage is measured between consecutive calls, so a check never blocks for
/// a sampling window. The first call only primes the CPU counters.
pub struct SystemMonitor {
    memory_threshold: f64,
    cpu_threshold: f64,
    system: Mutex<System>,
}

impl SystemMonitor {
    pub fn new(memory_threshold: f64, cpu_threshold: f64) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            memory_threshold,
            cpu_threshold,
            system: Mutex::new(system),
        }
    }

    /// Current (memory %, cpu %) or `None` when sampling is unavailable
    pub fn sample(&self) -> Option<(f64, f64)> {
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let memory = system.used_memory() as f64 / total as f64 * 100.0;
        let cpu = system.global_cpu_usage() as f64;
        if !memory.is_finite() || !cpu.is_finite() {
            return None;
        }
        Some((memory, cpu))
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(80.0, 80.0)
    }
}

impl ResourceMonitor for SystemMonitor {
    fn healthy(&self) -> bool {
        let Some((memory, cpu)) = self.sample() else {
            warn!("Resource sampling unavailable, assuming healthy");
            return true;
        };

        if memory > self.memory_threshold {
            warn!(
                "High memory usage: {:.1}% (threshold {:.1}%)",
                memory, self.memory_threshold
            );
            return false;
        }
        if cpu > self.cpu_threshold {
            warn!("High CPU usage: {:.1}% (threshold {:.1}%)", cpu, self.cpu_threshold);
            return false;
        }

        debug!("Resources healthy: memory {:.1}%, cpu {:.1}%", memory, cpu);
        true
    }

    fn free_disk_space(&self, path: &Path) -> Option<u64> {
        let target = existing_ancestor(path)?;
        let disks = Disks::new_with_refreshed_list();

        // Longest mount point containing the target wins
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    absolute
        .ancestors()
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
}

/// Fixed answers, for embedding without host sampling
#[derive(Debug, Clone)]
pub struct StaticMonitor {
    pub healthy: bool,
    pub free_space: Option<u64>,
}

impl StaticMonitor {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            free_space: Some(u64::MAX),
        }
    }
}

impl ResourceMonitor for StaticMonitor {
    fn healthy(&self) -> bool {
        self.healthy
    }

    fn free_disk_space(&self, _path: &Path) -> Option<u64> {
        self.free_space
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generous_thresholds_are_healthy() {
        let monitor = SystemMonitor::new(100.0, 100.0);
        assert!(monitor.healthy());
        assert!(monitor.healthy());
    }

    #[test]
    fn test_zero_memory_threshold_is_unhealthy() {
        let monitor = SystemMonitor::new(-1.0, 100.0);
        // Fails open when the host exposes no memory figures
        if monitor.sample().is_some() {
            assert!(!monitor.healthy());
        }
    }

    #[test]
    fn test_free_disk_space_for_missing_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("not").join("created");
        let monitor = SystemMonitor::default();

        let resolved = existing_ancestor(&nested).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());

        // Some sandboxes list no disk covering the temp dir
        let covered = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .any(|disk| resolved.starts_with(disk.mount_point()));
        assert_eq!(monitor.free_disk_space(&nested).is_some(), covered);
    }

    #[test]
    fn test_static_monitor() {
        let monitor = StaticMonitor {
            healthy: false,
            free_space: Some(10),
        };
        assert!(!monitor.healthy());
        assert_eq!(monitor.free_disk_space(Path::new("/")), Some(10));
        assert!(StaticMonitor::healthy().healthy());
    }
}

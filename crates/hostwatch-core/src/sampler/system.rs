//! Host metrics via sysinfo

use std::fs;
use std::path::Path;
use std::time::Duration;

use sysinfo::{Disks, System};
use tracing::{debug, warn};

use super::MetricSampler;
use crate::models::MetricSample;

/// Samples CPU, memory and configured disk partitions from the local host
pub struct SystemSampler {
    system: System,
    partitions: Vec<String>,
    cpu_window: Duration,
}

impl SystemSampler {
    /// Create a new sampler for the given partitions
    pub fn new(partitions: Vec<String>, cpu_window: Duration) -> Self {
        Self {
            system: System::new(),
            partitions,
            cpu_window: cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    /// CPU usage averaged over the sample window
    ///
    /// Blocks the calling thread for the window.
    fn cpu(&mut self) -> Option<f64> {
        self.system.refresh_cpu_usage();
        std::thread::sleep(self.cpu_window);
        self.system.refresh_cpu_usage();

        if self.system.cpus().is_empty() {
            warn!("No CPUs reported, skipping CPU sample");
            return None;
        }
        Some(f64::from(self.system.global_cpu_usage()).clamp(0.0, 100.0))
    }

    fn memory(&mut self) -> Option<f64> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            warn!("Total memory reported as zero, skipping memory sample");
            return None;
        }
        Some(percent(self.system.used_memory(), total))
    }

    fn disks(&self) -> Vec<MetricSample> {
        if self.partitions.is_empty() {
            return Vec::new();
        }

        let disks = Disks::new_with_refreshed_list();
        let mut samples = Vec::with_capacity(self.partitions.len());

        for partition in &self.partitions {
            let target = match fs::canonicalize(partition) {
                Ok(target) => target,
                Err(e) => {
                    warn!(partition = %partition, error = %e, "Partition not found, skipping");
                    continue;
                }
            };

            let mounts = disks.list().iter().map(|disk| disk.mount_point());
            let Some(mount) = resolve_mount(&target, mounts).map(Path::to_path_buf) else {
                warn!(partition = %partition, "No mounted filesystem contains partition, skipping");
                continue;
            };

            let Some(disk) = disks.list().iter().find(|disk| disk.mount_point() == mount) else {
                continue;
            };

            let total = disk.total_space();
            if total == 0 {
                warn!(partition = %partition, mount = %mount.display(), "Filesystem reports zero size, skipping");
                continue;
            }

            let used = total.saturating_sub(disk.available_space());
            debug!(partition = %partition, mount = %mount.display(), used, total, "Disk sampled");
            samples.push(MetricSample::disk(partition.clone(), percent(used, total)));
        }

        samples
    }
}

impl MetricSampler for SystemSampler {
    fn sample(&mut self) -> Vec<MetricSample> {
        let mut samples = Vec::with_capacity(2 + self.partitions.len());

        if let Some(cpu) = self.cpu() {
            samples.push(MetricSample::cpu(cpu));
        }
        if let Some(memory) = self.memory() {
            samples.push(MetricSample::memory(memory));
        }
        samples.extend(self.disks());

        samples
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(used: u64, total: u64) -> f64 {
    (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// The mount point that contains `target`: the longest matching prefix
fn resolve_mount<'a>(target: &Path, mounts: impl Iterator<Item = &'a Path>) -> Option<&'a Path> {
    mounts
        .filter(|mount| target.starts_with(mount))
        .max_by_key(|mount| mount.components().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mount_picks_longest_prefix() {
        let mounts = [Path::new("/"), Path::new("/var"), Path::new("/var/lib/docker"), Path::new("/home")];

        let pick = |target: &str| resolve_mount(Path::new(target), mounts.iter().copied());

        assert_eq!(pick("/var/log"), Some(Path::new("/var")));
        assert_eq!(pick("/var/lib/docker/overlay"), Some(Path::new("/var/lib/docker")));
        assert_eq!(pick("/"), Some(Path::new("/")));
        assert_eq!(pick("/variable"), Some(Path::new("/")));
    }

    #[test]
    fn test_resolve_mount_without_root() {
        let mounts = [Path::new("/data")];
        assert_eq!(resolve_mount(Path::new("/srv"), mounts.iter().copied()), None);
    }

    #[test]
    fn test_percent() {
        assert!((percent(45, 60) - 75.0).abs() < f64::EPSILON);
        assert!((percent(0, 60)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_partition_is_omitted() {
        let sampler = SystemSampler::new(vec!["/definitely/not/here".to_string()], Duration::ZERO);
        assert!(sampler.disks().is_empty());
    }
}

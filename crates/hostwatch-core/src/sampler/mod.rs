//! Metric sampling
//!
//! A sampler produces one snapshot per run. Metrics it cannot read are simply
//! left out; the evaluator leaves their state untouched.

mod system;

pub use system::SystemSampler;

use crate::models::{MetricKind, MetricSample};

/// Source of metric snapshots
pub trait MetricSampler: Send {
    /// Read every configured metric; unreadable ones are omitted
    fn sample(&mut self) -> Vec<MetricSample>;
}

/// One-line summary of a snapshot, e.g. `CPU: 12.0% | Memory: 40.5% | Disk /: 71.0%`
pub fn summarize(samples: &[MetricSample]) -> String {
    samples
        .iter()
        .map(|sample| match (sample.kind, sample.label.as_deref()) {
            (MetricKind::Cpu, _) => format!("CPU: {:.1}%", sample.value),
            (MetricKind::Memory, _) => format!("Memory: {:.1}%", sample.value),
            (MetricKind::Disk, partition) => {
                format!("Disk {}: {:.1}%", partition.unwrap_or("?"), sample.value)
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

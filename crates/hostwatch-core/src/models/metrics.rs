//! Metric sample models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Kind of resource a metric measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Global CPU utilization
    Cpu,
    /// Physical memory utilization
    Memory,
    /// Utilization of one disk partition
    Disk,
}

impl MetricKind {
    /// Wire name used in payloads and metric keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a tracked metric
///
/// Persisted as `cpu`, `memory` or `disk:<partition-path>`. Each disk
/// partition is its own key, so each gets an independent breach timer.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub enum MetricKey {
    /// CPU utilization
    Cpu,
    /// Memory utilization
    Memory,
    /// Disk utilization of the given partition path
    Disk(String),
}

impl MetricKey {
    /// Key for a disk partition
    pub fn disk(partition: impl Into<String>) -> Self {
        Self::Disk(partition.into())
    }

    /// Resource kind of this key
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Cpu => MetricKind::Cpu,
            Self::Memory => MetricKind::Memory,
            Self::Disk(_) => MetricKind::Disk,
        }
    }

    /// Partition path for disk keys
    pub fn partition(&self) -> Option<&str> {
        match self {
            Self::Disk(partition) => Some(partition),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Memory => f.write_str("memory"),
            Self::Disk(partition) => write!(f, "disk:{partition}"),
        }
    }
}

/// Error returned when a string is not a valid metric key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric key: {0:?}")]
pub struct ParseMetricKeyError(pub String);

impl FromStr for MetricKey {
    type Err = ParseMetricKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "memory" => Ok(Self::Memory),
            _ => match s.strip_prefix("disk:") {
                Some(partition) if !partition.is_empty() => Ok(Self::disk(partition)),
                _ => Err(ParseMetricKeyError(s.to_string())),
            },
        }
    }
}

/// A point-in-time reading of one metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Identity of the metric
    pub key: MetricKey,
    /// Resource kind
    pub kind: MetricKind,
    /// Utilization percentage (0-100)
    pub value: f64,
    /// Partition path, present only for disk samples
    pub label: Option<String>,
}

impl MetricSample {
    /// CPU utilization sample
    pub fn cpu(value: f64) -> Self {
        Self {
            key: MetricKey::Cpu,
            kind: MetricKind::Cpu,
            value,
            label: None,
        }
    }

    /// Memory utilization sample
    pub fn memory(value: f64) -> Self {
        Self {
            key: MetricKey::Memory,
            kind: MetricKind::Memory,
            value,
            label: None,
        }
    }

    /// Disk utilization sample for a partition
    pub fn disk(partition: impl Into<String>, value: f64) -> Self {
        let partition = partition.into();
        Self {
            key: MetricKey::disk(partition.clone()),
            kind: MetricKind::Disk,
            value,
            label: Some(partition),
        }
    }
}

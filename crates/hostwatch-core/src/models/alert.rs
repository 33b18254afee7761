//! Alert data models

use chrono::{DateTime, Utc};

use super::metrics::{MetricKey, MetricKind};

/// An alert produced by the evaluator for one metric key
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    /// The metric that triggered the alert
    pub key: MetricKey,

    /// Resource kind
    pub kind: MetricKind,

    /// Partition path for disk alerts
    pub label: Option<String>,

    /// The value observed when the alert fired
    pub current_value: f64,

    /// The threshold that was held or exceeded
    pub threshold: f64,

    /// When the alert fired
    pub triggered_at: DateTime<Utc>,

    /// Connectivity test alert, not produced by the evaluator
    pub synthetic: bool,
}

impl AlertEvent {
    /// Synthetic alert used to validate the webhook endpoint
    pub fn synthetic(kind: MetricKind, current_value: f64, threshold: f64, now: DateTime<Utc>) -> Self {
        let key = match kind {
            MetricKind::Cpu => MetricKey::Cpu,
            MetricKind::Memory => MetricKey::Memory,
            MetricKind::Disk => MetricKey::disk("/"),
        };

        Self {
            label: key.partition().map(String::from),
            key,
            kind,
            current_value,
            threshold,
            triggered_at: now,
            synthetic: true,
        }
    }
}

//! Durable breach-tracking state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::MetricKey;

/// Where a metric is in its breach lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreachStatus {
    /// Below threshold
    #[default]
    Normal,
    /// At or above threshold, no alert sent for this episode yet
    Breaching,
    /// At or above threshold and an alert has been sent (or suppressed by cooldown)
    Alerted,
}

/// Tracking record for one metric key
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreachState {
    /// Lifecycle status
    pub status: BreachStatus,

    /// When the current breach episode began
    #[serde(default)]
    pub breach_started_at: Option<DateTime<Utc>>,

    /// When the last alert for this key went out; survives recoveries
    #[serde(default)]
    pub last_alert_sent_at: Option<DateTime<Utc>>,
}

impl BreachState {
    /// Whether `breach_started_at` is set exactly when the metric is breaching
    pub fn is_consistent(&self) -> bool {
        match self.status {
            BreachStatus::Normal => self.breach_started_at.is_none(),
            BreachStatus::Breaching | BreachStatus::Alerted => self.breach_started_at.is_some(),
        }
    }

    /// Reset to `Normal`, ending the breach episode
    pub fn recover(&mut self) {
        self.status = BreachStatus::Normal;
        self.breach_started_at = None;
    }
}

/// Breach state of every tracked metric
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineState {
    metrics: BTreeMap<MetricKey, BreachState>,
}

impl EngineState {
    /// Empty state, as on a first run
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for a key, if tracked
    pub fn get(&self, key: &MetricKey) -> Option<&BreachState> {
        self.metrics.get(key)
    }

    /// Record for a key, creating a `Normal` one if absent
    pub fn entry(&mut self, key: MetricKey) -> &mut BreachState {
        self.metrics.entry(key).or_default()
    }

    /// Iterate records in key order
    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, &BreachState)> {
        self.metrics.iter()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether no key is tracked
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl FromIterator<(MetricKey, BreachState)> for EngineState {
    fn from_iter<I: IntoIterator<Item = (MetricKey, BreachState)>>(iter: I) -> Self {
        Self {
            metrics: iter.into_iter().collect(),
        }
    }
}

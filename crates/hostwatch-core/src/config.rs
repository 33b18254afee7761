//! Configuration management for HostWatch
//!
//! Configuration is layered: built-in defaults, then an optional file (JSON,
//! TOML or YAML, picked by extension), then `HOSTWATCH_*` environment
//! variables. Top-level keys match the flat layout of the classic
//! `monitor_config.json`, so an existing file keeps working.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerting::{RetryPolicy, Thresholds};
use crate::error::{Error, Result};
use crate::store::LockPolicy;

/// Default location of the persisted breach state
pub const DEFAULT_STATE_FILE: &str = "/var/lib/hostwatch/state.json";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HOSTWATCH";

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Webhook endpoint; empty disables delivery
    pub webhook_url: String,

    /// CPU utilization threshold (percent)
    pub cpu_threshold: f64,

    /// Memory utilization threshold (percent)
    pub memory_threshold: f64,

    /// Disk utilization threshold (percent), shared by all partitions
    pub disk_threshold: f64,

    /// Minutes a metric must stay at or above threshold before alerting
    pub sustained_threshold_minutes: u64,

    /// Minimum minutes between two alerts for the same metric
    pub alert_cooldown_minutes: u64,

    /// Seconds between runs in daemon mode
    pub check_interval_seconds: u64,

    /// Partitions to monitor
    pub disk_partitions: Vec<String>,

    /// Path of the persisted breach state
    pub state_file: PathBuf,

    /// Window over which CPU usage is measured (milliseconds)
    pub cpu_sample_window_ms: u64,

    /// Soft deadline for a single run (seconds)
    pub run_deadline_seconds: u64,

    /// Look up EC2 instance metadata for alert payloads
    pub ec2_metadata: bool,

    /// Webhook delivery settings
    pub dispatch: DispatchConfig,

    /// Run lock settings
    pub lock: LockConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            cpu_threshold: 90.0,
            memory_threshold: 90.0,
            disk_threshold: 90.0,
            sustained_threshold_minutes: 15,
            alert_cooldown_minutes: 180,
            check_interval_seconds: 60,
            disk_partitions: vec!["/".to_string()],
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            cpu_sample_window_ms: 1000,
            run_deadline_seconds: 55,
            ec2_metadata: false,
            dispatch: DispatchConfig::default(),
            lock: LockConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Webhook delivery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Total attempts per alert, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Run lock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long to wait for another run to finish before skipping
    #[serde(with = "humantime_serde")]
    pub wait: Duration,
    /// How often to retry the lock while waiting
    #[serde(with = "humantime_serde")]
    pub poll: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            poll: Duration::from_millis(100),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Directory for daily-rotated log files; stderr only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let environment = ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("disk_partitions")
            .try_parsing(true);

        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cpu_threshold", self.cpu_threshold),
            ("memory_threshold", self.memory_threshold),
            ("disk_threshold", self.disk_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::validation(format!(
                    "{name} must be between 0 and 100, got {value}"
                )));
            }
        }

        if self.check_interval_seconds == 0 {
            return Err(Error::validation("check_interval_seconds must be positive"));
        }
        if self.run_deadline_seconds == 0 {
            return Err(Error::validation("run_deadline_seconds must be positive"));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(Error::validation("dispatch.max_attempts must be at least 1"));
        }
        if self.disk_partitions.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::validation("disk_partitions must not contain empty paths"));
        }

        if !self.lock.wait.is_zero() && self.lock.poll.is_zero() {
            return Err(Error::validation("lock.poll must be positive when lock.wait is set"));
        }

        if let Some(endpoint) = self.webhook_endpoint() {
            let url = url::Url::parse(endpoint)
                .map_err(|e| Error::validation(format!("webhook_url is not a valid URL: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::validation(format!(
                    "webhook_url must use http or https, got {}",
                    url.scheme()
                )));
            }
        }

        Ok(())
    }

    /// The webhook endpoint, if delivery is enabled
    pub fn webhook_endpoint(&self) -> Option<&str> {
        let url = self.webhook_url.trim();
        (!url.is_empty()).then_some(url)
    }

    /// Evaluator settings derived from this configuration
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            cpu: self.cpu_threshold,
            memory: self.memory_threshold,
            disk: self.disk_threshold,
            sustain: minutes(self.sustained_threshold_minutes),
            cooldown: minutes(self.alert_cooldown_minutes),
        }
    }

    /// Delivery retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.dispatch.max_attempts, self.dispatch.backoff)
    }

    /// Run lock policy
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            wait: self.lock.wait,
            poll: self.lock.poll,
        }
    }

    /// Interval between daemon runs
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    /// Soft deadline for one run
    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_seconds)
    }

    /// CPU measurement window
    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_window_ms)
    }

    /// Render as pretty JSON, suitable for writing a starter config file
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn minutes(value: u64) -> chrono::Duration {
    // chrono durations are bounded by i64 milliseconds
    const MAX_MINUTES: i64 = i64::MAX / 60_000;
    let value = i64::try_from(value).unwrap_or(MAX_MINUTES).min(MAX_MINUTES);
    chrono::Duration::minutes(value)
}

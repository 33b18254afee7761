//! # HostWatch
//!
//! Host resource monitor with sustained-threshold webhook alerts.
//!
//! HostWatch samples CPU, memory and disk utilization, tracks how long each
//! metric has stayed at or above its threshold, and posts a webhook once a
//! breach has been sustained long enough. It is built to be invoked
//! periodically (cron, systemd timer) as a fresh process each time, so all
//! tracking state lives in a small JSON file guarded by an advisory lock.
//!
//! ## Architecture
//!
//! - **Sampler**: reads metrics from the OS via `sysinfo`
//! - **Store**: atomic JSON persistence of breach timers, plus the run lock
//! - **Alerting**: the breach/recovery/cooldown state machine and webhook delivery
//! - **Coordinator**: load → sample → evaluate → persist → dispatch
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter config, then edit webhook_url
//! hostwatch init-config
//!
//! # Check endpoint connectivity
//! hostwatch test-webhook
//!
//! # From cron, once a minute
//! hostwatch once
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod models;
pub mod sampler;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertSink, DispatchOutcome, ThresholdEvaluator, Thresholds};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::coordinator::{RunCoordinator, RunOutcome, RunReport};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::sampler::MetricSampler;
    pub use crate::store::{LockPolicy, StateStore};
}

//! Data models for HostWatch

mod alert;
mod metrics;
mod state;

pub use alert::*;
pub use metrics::*;
pub use state::*;

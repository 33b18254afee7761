//! Alerting engine for HostWatch
//!
//! Sustained-threshold evaluation and webhook notification delivery.

mod evaluator;
mod notifier;

pub use evaluator::{Evaluation, ThresholdEvaluator, Thresholds};
pub use notifier::{
    format_message, AlertSink, DispatchOutcome, NotificationError, RetryPolicy, WebhookDispatcher,
    WebhookPayload,
};

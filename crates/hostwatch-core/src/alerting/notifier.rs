//! Webhook delivery for alerts

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::identity::{Ec2Info, HostIdentity};
use crate::models::{AlertEvent, MetricKind};

/// How many times to try a delivery and how long to pause in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Policy with `max_attempts` total tries (at least one) and a fixed pause
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Retry immediately, for tests and latency-sensitive callers
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Total attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts
    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Result of delivering one alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The endpoint accepted the alert
    Delivered {
        /// Attempt that succeeded, starting at 1
        attempts: u32,
    },
    /// No endpoint configured
    Disabled,
    /// Every attempt failed
    Failed {
        /// Attempts made
        attempts: u32,
        /// Last failure
        error: String,
    },
}

impl DispatchOutcome {
    /// Whether the alert reached the endpoint
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Something that can deliver alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert; never fails the caller
    async fn dispatch(&self, event: &AlertEvent) -> DispatchOutcome;
}

/// Posts alerts as JSON to a webhook endpoint
pub struct WebhookDispatcher {
    client: Client,
    endpoint: Option<String>,
    identity: HostIdentity,
    retry: RetryPolicy,
}

impl WebhookDispatcher {
    /// Create a new dispatcher; `endpoint = None` makes every dispatch a no-op
    pub fn new(
        endpoint: Option<String>,
        identity: HostIdentity,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.filter(|url| !url.trim().is_empty()),
            identity,
            retry,
        })
    }

    /// Whether an endpoint is configured
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Build the wire payload for an alert
    pub fn build_payload(&self, event: &AlertEvent) -> WebhookPayload {
        WebhookPayload {
            timestamp: event.triggered_at,
            hostname: self.identity.hostname.clone(),
            ip_address: self.identity.ip_address.clone(),
            alert_type: event.kind,
            current_value: event.current_value,
            threshold: event.threshold,
            message: format_message(event, &self.identity.server_id()),
            partition: event.label.clone(),
            ec2_info: self.identity.ec2.clone(),
        }
    }

    /// One POST, no retry
    async fn send_once(&self, url: &str, payload: &WebhookPayload) -> Result<(), NotificationError> {
        let response = self.client.post(url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl AlertSink for WebhookDispatcher {
    async fn dispatch(&self, event: &AlertEvent) -> DispatchOutcome {
        let Some(url) = self.endpoint.as_deref() else {
            debug!(key = %event.key, "Webhook URL not configured, skipping alert");
            return DispatchOutcome::Disabled;
        };

        let payload = self.build_payload(event);
        let max_attempts = self.retry.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.send_once(url, &payload).await {
                Ok(()) => {
                    info!(key = %event.key, attempt, alert = %payload.message, "Alert sent");
                    return DispatchOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    warn!(key = %event.key, attempt, max_attempts, error = %e, "Alert delivery attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts && !self.retry.backoff().is_zero() {
                tokio::time::sleep(self.retry.backoff()).await;
            }
        }

        error!(key = %event.key, attempts = max_attempts, error = %last_error, "Giving up on alert delivery");

        DispatchOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }
}

/// Render the human-readable alert line
pub fn format_message(event: &AlertEvent, server_id: &str) -> String {
    let kind = event.kind.as_str();

    if event.synthetic {
        return format!(
            "✅ TEST ALERT on {server_id}: webhook delivery is working ({kind} usage is {:.1}%, threshold: {}%)",
            event.current_value, event.threshold
        );
    }

    match (event.kind, event.label.as_deref()) {
        (MetricKind::Disk, Some(partition)) => format!(
            "🚨 DISK ALERT on {server_id}: {partition} usage is {:.1}% (threshold: {}%)",
            event.current_value, event.threshold
        ),
        _ => format!(
            "🚨 {} ALERT on {server_id}: {kind} usage is {:.1}% (threshold: {}%)",
            kind.to_uppercase(),
            event.current_value,
            event.threshold
        ),
    }
}

/// Notification errors for a single attempt
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Transport failure or timeout
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("Webhook returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },
}

/// Webhook body
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    /// When the alert fired
    pub timestamp: DateTime<Utc>,
    /// Sending host
    pub hostname: String,
    /// Sending host's primary address
    pub ip_address: String,
    /// `cpu`, `memory` or `disk`
    pub alert_type: MetricKind,
    /// Observed utilization (percent)
    pub current_value: f64,
    /// Configured threshold (percent)
    pub threshold: f64,
    /// Human-readable alert line
    pub message: String,
    /// Partition path, `null` for CPU and memory
    pub partition: Option<String>,
    /// Instance metadata, only when lookup is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec2_info: Option<Ec2Info>,
}

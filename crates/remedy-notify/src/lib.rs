//! Best-effort notifications for remediation events
//!
//! Delivery must never dictate control-loop liveness: the hub hands events to
//! a detached emitter task over a bounded broadcast channel. When the emitter
//! lags, the oldest entries are dropped; publishing never blocks and never
//! fails the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remedy_common::{ActionKind, Error, Incident, Result, Severity};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Deadline for one webhook delivery
pub const NOTIFY_DEADLINE: Duration = Duration::from_secs(5);

/// Buffered events before the oldest get dropped
pub const HUB_CAPACITY: usize = 256;

/// Notification severity; `Success` marks a completed remediation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotifySeverity {
    Info,
    Success,
    Warning,
    Critical,
}

impl NotifySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifySeverity::Info => "INFO",
            NotifySeverity::Success => "SUCCESS",
            NotifySeverity::Warning => "WARNING",
            NotifySeverity::Critical => "CRITICAL",
        }
    }
}

impl From<Severity> for NotifySeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => NotifySeverity::Info,
            Severity::Warning => NotifySeverity::Warning,
            Severity::Critical => NotifySeverity::Critical,
        }
    }
}

/// One user-visible event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: NotifySeverity,
    pub message: String,
    pub metadata: serde_json::Value,
}

impl Notification {
    pub fn new(severity: NotifySeverity, message: String, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            message,
            metadata,
        }
    }
}

/// A delivery channel
#[async_trait]
pub trait Notify: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Logs every notification through tracing
pub struct ConsoleNotifier;

#[async_trait]
impl Notify for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let line = format!(
            "[NOTIFICATION] {} | {}",
            notification.message, notification.metadata
        );
        match notification.severity {
            NotifySeverity::Critical => error!("{}", line),
            NotifySeverity::Warning => warn!("{}", line),
            NotifySeverity::Info | NotifySeverity::Success => info!("{}", line),
        }
        Ok(())
    }
}

/// Posts notifications to a Slack incoming webhook
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_DEADLINE)
            .build()
            .map_err(|e| Error::Notification(format!("failed to build Slack client: {}", e)))?;
        Ok(Self { webhook_url, client })
    }

    fn payload(notification: &Notification) -> serde_json::Value {
        let emoji = match notification.severity {
            NotifySeverity::Critical => ":red_circle:",
            NotifySeverity::Warning => ":warning:",
            NotifySeverity::Info => ":information_source:",
            NotifySeverity::Success => ":white_check_mark:",
        };

        let mut text = format!(
            "{} *{}* - {}",
            emoji,
            notification.severity.as_str(),
            notification.message
        );
        if !notification.metadata.is_null() {
            text.push_str(&format!("\n```{}```", notification.metadata));
        }

        serde_json::json!({
            "text": text,
            "username": "Remedy Bot",
            "icon_emoji": ":robot_face:",
        })
    }
}

#[async_trait]
impl Notify for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(notification))
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Slack webhook failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Notification(format!(
                "Slack webhook returned HTTP {}",
                response.status()
            )));
        }

        debug!("Slack notification delivered");
        Ok(())
    }
}

/// Fan-out hub with a detached emitter
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
    _emitter: tokio::task::JoinHandle<()>,
}

impl NotificationHub {
    pub fn new(channels: Vec<Box<dyn Notify>>) -> Self {
        Self::with_capacity(channels, HUB_CAPACITY)
    }

    pub fn with_capacity(channels: Vec<Box<dyn Notify>>, capacity: usize) -> Self {
        let (sender, mut receiver) = broadcast::channel::<Notification>(capacity);

        let emitter = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) => {
                        for channel in &channels {
                            if let Err(e) = channel.send(&notification).await {
                                error!(channel = channel.name(), "notification delivery failed: {}", e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        warn!(dropped, "notification buffer overflow, oldest entries dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { sender, _emitter: emitter }
    }

    /// Queue a notification; never blocks, never fails the control loop.
    pub fn publish(
        &self,
        severity: NotifySeverity,
        message: String,
        metadata: serde_json::Value,
    ) {
        let notification = Notification::new(severity, message, metadata);
        // Send only errors when the emitter is gone; nothing to do then.
        let _ = self.sender.send(notification);
    }

    pub fn incident_detected(&self, incident: &Incident, service: &str) {
        self.publish(
            incident.severity.into(),
            format!(
                "Incident detected on `{}`: {} ({})",
                service, incident.kind, incident.severity
            ),
            incident.details.clone(),
        );
    }

    pub fn remediation_started(&self, action: ActionKind, target: &str, reason: &str) {
        self.publish(
            NotifySeverity::Info,
            format!("Starting remediation: `{}` on `{}` - {}", action, target, reason),
            serde_json::Value::Null,
        );
    }

    pub fn remediation_succeeded(&self, action: ActionKind, target: &str, elapsed_ms: i64) {
        self.publish(
            NotifySeverity::Success,
            format!(
                "Remediation successful: `{}` on `{}` (completed in {}ms)",
                action, target, elapsed_ms
            ),
            serde_json::Value::Null,
        );
    }

    pub fn remediation_failed(&self, action: ActionKind, target: &str, error: &str) {
        self.publish(
            NotifySeverity::Critical,
            format!("Remediation failed: `{}` on `{}` - {}", action, target, error),
            serde_json::json!({ "error": error }),
        );
    }

    pub fn breaker_blocked(&self, target: &str, reason: &str) {
        self.publish(
            NotifySeverity::Warning,
            format!("Circuit breaker blocked action on `{}` - {}", target, reason),
            serde_json::json!({ "reason": reason }),
        );
    }

    pub fn escalation_required(&self, target: &str, reason: &str) {
        self.publish(
            NotifySeverity::Critical,
            format!(
                "ESCALATION REQUIRED for `{}` - auto-remediation exhausted, manual intervention needed: {}",
                target, reason
            ),
            serde_json::json!({ "escalation_reason": reason }),
        );
    }

    pub fn cleanup_summary(&self, incidents: u64, actions: u64, retention_days: i64) {
        self.publish(
            NotifySeverity::Info,
            format!(
                "Database cleanup completed: removed {} incidents and {} actions older than {} days",
                incidents, actions, retention_days
            ),
            serde_json::Value::Null,
        );
    }

    pub fn predicted_failure(&self, severity: NotifySeverity, probability: f64, risk: &str) {
        self.publish(
            severity,
            format!(
                "Predicted failure: {:.0}% chance of system failure in the next hour ({} risk)",
                probability * 100.0,
                risk
            ),
            serde_json::json!({ "probability": probability, "risk_level": risk }),
        );
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        self._emitter.abort();
    }
}

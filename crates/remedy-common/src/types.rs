//! Core domain types for the remedy control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health snapshot as reported by the monitored service's health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uptime_seconds: Option<u64>,
    #[serde(default)]
    pub metrics: Option<HealthMetrics>,
    #[serde(default)]
    pub flags: HealthFlags,
}

/// Metric block of a health snapshot; percentiles may be absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub cpu_usage_percent: f64,
    #[serde(default)]
    pub memory_usage_mb: f64,
    #[serde(default)]
    pub response_time_p50_ms: Option<f64>,
    #[serde(default)]
    pub response_time_p95_ms: Option<f64>,
    #[serde(default)]
    pub response_time_p99_ms: Option<f64>,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_errors: u64,
}

/// Simulation flags exposed by the monitored service
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthFlags {
    #[serde(default)]
    pub cpu_spike: bool,
    #[serde(default)]
    pub error_spike: bool,
}

/// Categorized health probe failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    ConnectionRefused,
    Timeout,
    Http(u16),
    MalformedBody,
    Other(String),
}

impl ProbeFailure {
    /// Stable category label recorded in incident details
    pub fn category(&self) -> String {
        match self {
            ProbeFailure::ConnectionRefused => "connection_refused".to_string(),
            ProbeFailure::Timeout => "timeout".to_string(),
            ProbeFailure::Http(code) => format!("http_{}", code),
            ProbeFailure::MalformedBody => "malformed_body".to_string(),
            ProbeFailure::Other(_) => "other".to_string(),
        }
    }
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Other(detail) => write!(f, "other: {}", detail),
            _ => write!(f, "{}", self.category()),
        }
    }
}

/// One poll of the monitored service: a snapshot, or a categorized failure
#[derive(Debug, Clone)]
pub enum Observation {
    Snapshot(HealthSnapshot),
    ProbeFailed(ProbeFailure),
}

impl Observation {
    pub fn snapshot(&self) -> Option<&HealthSnapshot> {
        match self {
            Observation::Snapshot(s) => Some(s),
            Observation::ProbeFailed(_) => None,
        }
    }
}

/// Incident classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    HealthCheckFailed,
    HighErrorRate,
    CpuSpike,
    HighResponseTime,
    MlAnomaly,
    PredictedFailure,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::HealthCheckFailed => "health_check_failed",
            IncidentKind::HighErrorRate => "high_error_rate",
            IncidentKind::CpuSpike => "cpu_spike",
            IncidentKind::HighResponseTime => "high_response_time",
            IncidentKind::MlAnomaly => "ml_anomaly",
            IncidentKind::PredictedFailure => "predicted_failure",
        }
    }
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a persisted incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    Active,
    Resolved,
    Escalated,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Active => "ACTIVE",
            IncidentStatus::Resolved => "RESOLVED",
            IncidentStatus::Escalated => "ESCALATED",
        }
    }
}

/// A detected threshold breach, prior to persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    #[serde(rename = "type")]
    pub kind: IncidentKind,
    pub severity: Severity,
    pub details: serde_json::Value,
}

impl Incident {
    pub fn new(kind: IncidentKind, severity: Severity, details: serde_json::Value) -> Self {
        Self { kind, severity, details }
    }
}

/// Remediation action vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartContainer,
    StartReplica,
    StopReplica,
    ScaleReplicas,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::RestartContainer => "restart_container",
            ActionKind::StartReplica => "start_replica",
            ActionKind::StopReplica => "stop_replica",
            ActionKind::ScaleReplicas => "scale_replicas",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who initiated a remediation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Bot,
    Api,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Bot => "bot",
            Trigger::Api => "api",
            Trigger::Manual => "manual",
        }
    }
}

/// Result of executing a remediation action against the container runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
}

impl ActionOutcome {
    pub fn succeeded(execution_time_ms: i64) -> Self {
        Self { success: true, error_message: None, execution_time_ms }
    }

    pub fn failed(error: impl Into<String>, execution_time_ms: i64) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            execution_time_ms,
        }
    }
}

//! Threshold detectors
//!
//! Every comparison is strictly greater-than: a metric exactly at its
//! threshold does not trigger.

use async_trait::async_trait;
use remedy_common::{Incident, IncidentKind, Observation, Result, Severity, Thresholds};
use serde_json::json;
use tracing::{error, warn};

/// Classifier from one observation to at most one incident
#[async_trait]
pub trait Detect: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(
        &self,
        observation: &Observation,
        thresholds: &Thresholds,
    ) -> Result<Option<Incident>>;
}

/// Emits `health_check_failed` when the probe could not produce a snapshot
pub struct HealthCheckDetector;

#[async_trait]
impl Detect for HealthCheckDetector {
    fn name(&self) -> &'static str {
        "health_check"
    }

    async fn detect(
        &self,
        observation: &Observation,
        _thresholds: &Thresholds,
    ) -> Result<Option<Incident>> {
        let Observation::ProbeFailed(failure) = observation else {
            return Ok(None);
        };

        Ok(Some(Incident::new(
            IncidentKind::HealthCheckFailed,
            Severity::Critical,
            json!({
                "reason": failure.category(),
                "message": format!("health endpoint unreachable: {}", failure),
            }),
        )))
    }
}

/// Emits `high_error_rate` above the configured error-rate threshold
pub struct ErrorRateDetector;

#[async_trait]
impl Detect for ErrorRateDetector {
    fn name(&self) -> &'static str {
        "error_rate"
    }

    async fn detect(
        &self,
        observation: &Observation,
        thresholds: &Thresholds,
    ) -> Result<Option<Incident>> {
        let Some(metrics) = observation.snapshot().and_then(|s| s.metrics.as_ref()) else {
            return Ok(None);
        };

        let threshold = thresholds.error_rate;
        if metrics.error_rate <= threshold {
            return Ok(None);
        }

        let severity = if metrics.error_rate > threshold * 3.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Ok(Some(Incident::new(
            IncidentKind::HighErrorRate,
            severity,
            json!({
                "error_rate": metrics.error_rate,
                "threshold": threshold,
                "total_requests": metrics.total_requests,
                "total_errors": metrics.total_errors,
            }),
        )))
    }
}

/// Emits `cpu_spike` above the CPU threshold or when the spike flag is set
pub struct CpuSpikeDetector;

#[async_trait]
impl Detect for CpuSpikeDetector {
    fn name(&self) -> &'static str {
        "cpu_spike"
    }

    async fn detect(
        &self,
        observation: &Observation,
        thresholds: &Thresholds,
    ) -> Result<Option<Incident>> {
        let Some(snapshot) = observation.snapshot() else {
            return Ok(None);
        };
        let Some(metrics) = snapshot.metrics.as_ref() else {
            return Ok(None);
        };

        let threshold = thresholds.cpu_percent;
        let flagged = snapshot.flags.cpu_spike;
        if metrics.cpu_usage_percent <= threshold && !flagged {
            return Ok(None);
        }

        let severity = if metrics.cpu_usage_percent > threshold * 1.2 {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Ok(Some(Incident::new(
            IncidentKind::CpuSpike,
            severity,
            json!({
                "cpu_usage_percent": metrics.cpu_usage_percent,
                "threshold": threshold,
                "simulated": flagged,
            }),
        )))
    }
}

/// Emits `high_response_time` when p95 latency is present and breaches
pub struct ResponseTimeDetector;

#[async_trait]
impl Detect for ResponseTimeDetector {
    fn name(&self) -> &'static str {
        "response_time"
    }

    async fn detect(
        &self,
        observation: &Observation,
        thresholds: &Thresholds,
    ) -> Result<Option<Incident>> {
        let Some(metrics) = observation.snapshot().and_then(|s| s.metrics.as_ref()) else {
            return Ok(None);
        };
        let Some(p95) = metrics.response_time_p95_ms else {
            return Ok(None);
        };

        let threshold = thresholds.response_time_ms;
        if p95 <= threshold {
            return Ok(None);
        }

        let severity = if p95 > threshold * 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Ok(Some(Incident::new(
            IncidentKind::HighResponseTime,
            severity,
            json!({
                "p95_response_time_ms": p95,
                "threshold": threshold,
                "p50_ms": metrics.response_time_p50_ms,
                "p99_ms": metrics.response_time_p99_ms,
            }),
        )))
    }
}

/// Runs all detectors against an observation, isolating per-detector errors
pub struct DetectorChain {
    detectors: Vec<Box<dyn Detect>>,
}

impl DetectorChain {
    /// The fixed core chain; ML detection is attached separately when a
    /// scorer is available.
    pub fn standard() -> Self {
        Self {
            detectors: vec![
                Box::new(HealthCheckDetector),
                Box::new(ErrorRateDetector),
                Box::new(CpuSpikeDetector),
                Box::new(ResponseTimeDetector),
            ],
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn Detect>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// One failing detector never suppresses the others.
    pub async fn run(&self, observation: &Observation, thresholds: &Thresholds) -> Vec<Incident> {
        let mut incidents = Vec::new();

        for detector in &self.detectors {
            match detector.detect(observation, thresholds).await {
                Ok(Some(incident)) => {
                    warn!(
                        detector = detector.name(),
                        kind = %incident.kind,
                        severity = %incident.severity,
                        "incident detected"
                    );
                    incidents.push(incident);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(detector = detector.name(), "detector failed: {}", e);
                }
            }
        }

        incidents
    }
}

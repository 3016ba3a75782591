//! Optional ML plug-in contracts
//!
//! The control plane compiles and runs with no ML components attached. A
//! scorer participates in the detector chain; a predictor produces advisory
//! incidents in the monitor loop. Either must answer within
//! [`ML_CALL_DEADLINE`] or it is skipped for the tick.

use async_trait::async_trait;
use remedy_common::{Error, Incident, IncidentKind, Observation, Result, Severity, Thresholds};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::detectors::Detect;

/// Hard deadline for any ML call
pub const ML_CALL_DEADLINE: Duration = Duration::from_millis(500);

/// Default minimum anomaly severity before an incident is emitted
pub const DEFAULT_ANOMALY_SEVERITY_THRESHOLD: f64 = 70.0;

/// Anomaly severity at or above which the incident is CRITICAL
const CRITICAL_ANOMALY_SEVERITY: f64 = 85.0;

/// Verdict of an anomaly scorer for one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub is_anomaly: bool,
    /// Severity in 0..100
    pub severity: f64,
    /// Feature name to contribution weight, strongest first
    pub contributing_features: Vec<(String, f64)>,
}

#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    async fn score(&self, observation: &Observation) -> Result<AnomalyScore>;
}

/// Failure risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Advisory forecast from a failure predictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureForecast {
    /// Probability of failure in the forecast horizon, 0..1
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub top_features: Vec<String>,
}

#[async_trait]
pub trait FailurePredictor: Send + Sync {
    async fn predict(&self) -> Result<FailureForecast>;
}

/// Detector adapter over an attached anomaly scorer
pub struct MlAnomalyDetector {
    scorer: Arc<dyn AnomalyScorer>,
    severity_threshold: f64,
}

impl MlAnomalyDetector {
    pub fn new(scorer: Arc<dyn AnomalyScorer>) -> Self {
        Self { scorer, severity_threshold: DEFAULT_ANOMALY_SEVERITY_THRESHOLD }
    }

    pub fn with_severity_threshold(mut self, threshold: f64) -> Self {
        self.severity_threshold = threshold;
        self
    }
}

#[async_trait]
impl Detect for MlAnomalyDetector {
    fn name(&self) -> &'static str {
        "ml_anomaly"
    }

    async fn detect(
        &self,
        observation: &Observation,
        _thresholds: &Thresholds,
    ) -> Result<Option<Incident>> {
        if observation.snapshot().and_then(|s| s.metrics.as_ref()).is_none() {
            return Ok(None);
        }

        let score = tokio::time::timeout(ML_CALL_DEADLINE, self.scorer.score(observation))
            .await
            .map_err(|_| Error::Timeout("anomaly scorer exceeded 500ms deadline".to_string()))??;

        if !score.is_anomaly || score.severity < self.severity_threshold {
            return Ok(None);
        }

        let severity = if score.severity >= CRITICAL_ANOMALY_SEVERITY {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let top_features: serde_json::Map<String, serde_json::Value> = score
            .contributing_features
            .iter()
            .take(3)
            .map(|(name, weight)| (name.clone(), json!(weight)))
            .collect();

        Ok(Some(Incident::new(
            IncidentKind::MlAnomaly,
            severity,
            json!({
                "anomaly_severity": score.severity,
                "top_contributing_features": top_features,
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_common::{HealthFlags, HealthMetrics, HealthSnapshot};

    fn observation() -> Observation {
        Observation::Snapshot(HealthSnapshot {
            service: Some("app".to_string()),
            timestamp: None,
            uptime_seconds: Some(60),
            metrics: Some(HealthMetrics::default()),
            flags: HealthFlags::default(),
        })
    }

    struct FixedScorer(AnomalyScore);

    #[async_trait]
    impl AnomalyScorer for FixedScorer {
        async fn score(&self, _observation: &Observation) -> Result<AnomalyScore> {
            Ok(self.0.clone())
        }
    }

    struct SlowScorer;

    #[async_trait]
    impl AnomalyScorer for SlowScorer {
        async fn score(&self, _observation: &Observation) -> Result<AnomalyScore> {
            tokio::time::sleep(Duration::from_millis(700)).await;
            Ok(AnomalyScore { is_anomaly: true, severity: 99.0, contributing_features: vec![] })
        }
    }

    #[tokio::test]
    async fn below_severity_threshold_is_silent() {
        let detector = MlAnomalyDetector::new(Arc::new(FixedScorer(AnomalyScore {
            is_anomaly: true,
            severity: 50.0,
            contributing_features: vec![],
        })));
        let result = detector
            .detect(&observation(), &Thresholds::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn severe_anomaly_is_critical_with_top_features() {
        let detector = MlAnomalyDetector::new(Arc::new(FixedScorer(AnomalyScore {
            is_anomaly: true,
            severity: 92.0,
            contributing_features: vec![
                ("error_rate".to_string(), 0.6),
                ("cpu_usage_percent".to_string(), 0.3),
                ("memory_usage_mb".to_string(), 0.08),
                ("uptime_seconds".to_string(), 0.02),
            ],
        })));

        let incident = detector
            .detect(&observation(), &Thresholds::default())
            .await
            .unwrap()
            .expect("incident");

        assert_eq!(incident.kind, IncidentKind::MlAnomaly);
        assert_eq!(incident.severity, Severity::Critical);
        let features = incident.details["top_contributing_features"]
            .as_object()
            .unwrap();
        assert_eq!(features.len(), 3);
        assert!(!features.contains_key("uptime_seconds"));
    }

    #[tokio::test]
    async fn moderate_anomaly_is_warning() {
        let detector = MlAnomalyDetector::new(Arc::new(FixedScorer(AnomalyScore {
            is_anomaly: true,
            severity: 75.0,
            contributing_features: vec![],
        })));
        let incident = detector
            .detect(&observation(), &Thresholds::default())
            .await
            .unwrap()
            .expect("incident");
        assert_eq!(incident.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn attached_scorer_participates_in_the_chain() {
        let chain = crate::detectors::DetectorChain::standard().with_detector(Box::new(
            MlAnomalyDetector::new(Arc::new(FixedScorer(AnomalyScore {
                is_anomaly: true,
                severity: 90.0,
                contributing_features: vec![("error_rate".to_string(), 0.9)],
            }))),
        ));

        let incidents = chain.run(&observation(), &Thresholds::default()).await;
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind, IncidentKind::MlAnomaly);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_scorer_is_skipped_with_timeout_error() {
        let detector = MlAnomalyDetector::new(Arc::new(SlowScorer));
        let err = detector
            .detect(&observation(), &Thresholds::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "timeout");
    }
}

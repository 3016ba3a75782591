//! Remediation strategy
//!
//! Maps a surviving incident to at most one action. The table is graduated
//! by severity within type; everything currently funnels into a restart of
//! the primary container. `start_replica` enters the table once a replica is
//! provisioned alongside the app.

use remedy_common::{ActionKind, Incident, IncidentKind, Severity};
use tracing::debug;

/// A decided remediation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPlan {
    pub action: ActionKind,
    pub target: String,
    pub reason: String,
}

pub struct Strategy {
    app_container: String,
}

impl Strategy {
    pub fn new(app_container: String) -> Self {
        Self { app_container }
    }

    fn restart_app(&self, reason: String) -> ActionPlan {
        ActionPlan {
            action: ActionKind::RestartContainer,
            target: self.app_container.clone(),
            reason,
        }
    }

    /// Decide what to do about an incident; `None` means notify-only.
    pub fn decide(&self, incident: &Incident) -> Option<ActionPlan> {
        let details = &incident.details;

        let plan = match incident.kind {
            IncidentKind::HealthCheckFailed => Some(self.restart_app(
                "health check failed - service unresponsive".to_string(),
            )),
            IncidentKind::HighErrorRate => {
                let rate = details["error_rate"].as_f64().unwrap_or(0.0);
                Some(self.restart_app(format!(
                    "high error rate: {:.1}% - restarting to recover",
                    rate * 100.0
                )))
            }
            IncidentKind::CpuSpike => {
                let cpu = details["cpu_usage_percent"].as_f64().unwrap_or(0.0);
                if cpu > 95.0 {
                    Some(self.restart_app(format!(
                        "extreme CPU usage: {:.0}% - forcing restart",
                        cpu
                    )))
                } else {
                    Some(self.restart_app(format!(
                        "CPU spike detected: {:.0}% - restarting to recover",
                        cpu
                    )))
                }
            }
            IncidentKind::HighResponseTime => {
                let p95 = details["p95_response_time_ms"].as_f64().unwrap_or(0.0);
                Some(self.restart_app(format!("high response time: p95={:.0}ms - restarting", p95)))
            }
            IncidentKind::MlAnomaly => {
                if incident.severity == Severity::Critical {
                    Some(self.restart_app("critical ML anomaly - restarting".to_string()))
                } else {
                    None
                }
            }
            // Advisory only; operators are notified, nothing is touched.
            IncidentKind::PredictedFailure => None,
        };

        if plan.is_none() {
            debug!(kind = %incident.kind, "no remediation action for incident");
        }
        plan
    }
}

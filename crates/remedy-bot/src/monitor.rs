//! The monitor loop
//!
//! A single control task drives the whole pipeline at a fixed cadence. Each
//! tick is the unit of resilience: nothing is recovered across ticks, and a
//! transient fault self-heals by being re-detected on the next one.

use chrono::{DateTime, Utc};
use remedy_actuate::Actuator;
use remedy_breaker::{CircuitBreaker, GateDecision};
use remedy_common::{BotConfig, Clock, Incident, IncidentKind, Result, Severity, Thresholds, Trigger};
use remedy_detect::{Deduplicator, DetectorChain, FailurePredictor, RiskLevel, ML_CALL_DEADLINE};
use remedy_notify::NotificationHub;
use remedy_probe::Probe;
use remedy_store::{IncidentStore, RetentionSweeper};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::strategy::Strategy;

/// Cadence and interval settings for the loop
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Time between ticks
    pub poll: Duration,
    /// Service name attributed to incidents when the probe failed
    pub service_fallback: String,
    /// Thresholds are re-read from the store every this many ticks
    pub threshold_refresh_ticks: u64,
    pub cleanup_interval: chrono::Duration,
    pub failure_check_interval: chrono::Duration,
    /// Minimum gap between advisory alerts for the same risk level
    pub prediction_realert: chrono::Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            poll: Duration::from_secs(config.poll_seconds),
            service_fallback: config.app_container.clone(),
            threshold_refresh_ticks: 10,
            cleanup_interval: chrono::Duration::hours(config.cleanup_interval_hours as i64),
            failure_check_interval: chrono::Duration::seconds(
                config.failure_check_interval_secs as i64,
            ),
            prediction_realert: chrono::Duration::minutes(10),
        }
    }
}

/// Everything the loop orchestrates
pub struct Dependencies {
    pub probe: Arc<dyn Probe>,
    pub chain: DetectorChain,
    pub dedup: Deduplicator,
    pub strategy: Strategy,
    pub breaker: Arc<CircuitBreaker>,
    pub actuator: Actuator,
    pub store: Arc<dyn IncidentStore>,
    pub sweeper: RetentionSweeper,
    pub hub: NotificationHub,
    pub predictor: Option<Arc<dyn FailurePredictor>>,
    pub clock: Arc<dyn Clock>,
}

pub struct Monitor {
    settings: MonitorSettings,
    probe: Arc<dyn Probe>,
    chain: DetectorChain,
    dedup: Deduplicator,
    strategy: Strategy,
    breaker: Arc<CircuitBreaker>,
    actuator: Actuator,
    store: Arc<dyn IncidentStore>,
    sweeper: RetentionSweeper,
    hub: NotificationHub,
    predictor: Option<Arc<dyn FailurePredictor>>,
    clock: Arc<dyn Clock>,
    thresholds: Thresholds,
    last_cleanup_at: Option<DateTime<Utc>>,
    last_prediction_at: Option<DateTime<Utc>>,
    last_risk_alert: HashMap<RiskLevel, DateTime<Utc>>,
    loop_errors: u64,
}

impl Monitor {
    pub fn new(settings: MonitorSettings, thresholds: Thresholds, deps: Dependencies) -> Self {
        Self {
            settings,
            probe: deps.probe,
            chain: deps.chain,
            dedup: deps.dedup,
            strategy: deps.strategy,
            breaker: deps.breaker,
            actuator: deps.actuator,
            store: deps.store,
            sweeper: deps.sweeper,
            hub: deps.hub,
            predictor: deps.predictor,
            clock: deps.clock,
            thresholds,
            last_cleanup_at: None,
            last_prediction_at: None,
            last_risk_alert: HashMap::new(),
            loop_errors: 0,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn loop_errors(&self) -> u64 {
        self.loop_errors
    }

    /// One-time work before the first tick: load operator thresholds and
    /// resolve incidents orphaned by a crash after a successful action.
    pub async fn startup(&mut self) {
        match self.store.read_thresholds().await {
            Ok(thresholds) => {
                if thresholds != self.thresholds {
                    info!(?thresholds, "thresholds loaded from store");
                    self.thresholds = thresholds;
                }
            }
            Err(e) => warn!("could not load thresholds at startup: {}", e),
        }

        match self.store.reconcile_orphans().await {
            Ok(0) => {}
            Ok(resolved) => info!(resolved, "orphan incidents reconciled"),
            Err(e) => warn!("orphan reconciliation failed: {}", e),
        }
    }

    /// Run forever; a pending shutdown is honored at the inter-tick sleep,
    /// so the current tick always completes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = self.settings.poll.as_secs(),
            "monitor loop started"
        );

        let mut iteration: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            iteration += 1;
            if let Err(e) = self.tick(iteration).await {
                self.loop_errors += 1;
                error!(iteration, category = e.category(), "tick abandoned: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(iterations = iteration, errors = self.loop_errors, "monitor loop stopped");
    }

    /// One full pass of the control pipeline.
    pub async fn tick(&mut self, iteration: u64) -> Result<()> {
        if iteration % self.settings.threshold_refresh_ticks == 0 {
            self.refresh_thresholds().await;
        }

        self.run_cleanup_if_due().await;
        self.check_failure_prediction().await;

        let observation = self.probe.observe().await;
        let service = observation
            .snapshot()
            .and_then(|s| s.service.clone())
            .unwrap_or_else(|| self.settings.service_fallback.clone());

        let incidents = self.chain.run(&observation, &self.thresholds).await;
        if incidents.is_empty() {
            debug!(iteration, "no incidents detected");
            return Ok(());
        }

        for incident in incidents {
            if !self.dedup.admit(incident.kind) {
                continue;
            }
            self.handle_incident(&incident, &service).await?;
        }

        Ok(())
    }

    async fn handle_incident(&mut self, incident: &Incident, service: &str) -> Result<()> {
        warn!(kind = %incident.kind, severity = %incident.severity, service, "handling incident");
        self.hub.incident_detected(incident, service);

        // Without a persisted identity there is nothing to link a resolution
        // to, so the action is not taken and the tick is abandoned.
        let incident_id = self.store.log_incident(incident, service).await?;

        let Some(plan) = self.strategy.decide(incident) else {
            return Ok(());
        };

        if let GateDecision::Block { reason } = self.breaker.gate(&plan.target, plan.action) {
            self.hub.breaker_blocked(&plan.target, &reason);
            self.hub.escalation_required(&plan.target, &reason);
            if let Err(e) = self.store.escalate_incident(incident_id, &reason).await {
                error!(incident_id, "failed to escalate incident: {}", e);
            }
            return Ok(());
        }

        self.hub
            .remediation_started(plan.action, &plan.target, &plan.reason);

        let outcome = self.actuator.execute(plan.action, &plan.target).await;
        self.breaker.record(&plan.target, plan.action, outcome.success);

        if let Err(e) = self
            .store
            .log_action(Some(incident_id), plan.action, &plan.target, &outcome, Trigger::Bot)
            .await
        {
            error!(incident_id, "failed to log action: {}", e);
        }

        if outcome.success {
            if let Err(e) = self.store.resolve_incident(incident_id).await {
                error!(incident_id, "failed to resolve incident: {}", e);
            }
            self.hub
                .remediation_succeeded(plan.action, &plan.target, outcome.execution_time_ms);
        } else {
            let detail = outcome.error_message.as_deref().unwrap_or("unknown error");
            self.hub.remediation_failed(plan.action, &plan.target, detail);
            self.hub.escalation_required(
                &plan.target,
                &format!("remediation action failed: {}", detail),
            );
        }

        Ok(())
    }

    async fn refresh_thresholds(&mut self) {
        match self.store.read_thresholds().await {
            Ok(thresholds) => {
                if thresholds != self.thresholds {
                    info!(?thresholds, "thresholds updated from store");
                    self.thresholds = thresholds;
                }
            }
            Err(e) => error!("threshold refresh failed, keeping current values: {}", e),
        }
    }

    async fn run_cleanup_if_due(&mut self) {
        let now = self.clock.now();
        let due = self
            .last_cleanup_at
            .map(|last| now - last >= self.settings.cleanup_interval)
            .unwrap_or(true);
        if !due {
            return;
        }

        // Recorded before the attempt so a failing sweep retries next
        // interval rather than every tick.
        self.last_cleanup_at = Some(now);

        match self.sweeper.run().await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => {
                self.hub.cleanup_summary(
                    report.incidents_deleted,
                    report.actions_deleted,
                    self.sweeper.retention_days(),
                );
            }
            Err(e) => {
                error!("retention cleanup failed: {}", e);
                self.hub.publish(
                    remedy_notify::NotifySeverity::Warning,
                    format!("Database cleanup failed: {}", e),
                    serde_json::Value::Null,
                );
            }
        }
    }

    async fn check_failure_prediction(&mut self) {
        let Some(predictor) = self.predictor.clone() else {
            return;
        };

        let now = self.clock.now();
        if let Some(last) = self.last_prediction_at {
            if now - last < self.settings.failure_check_interval {
                return;
            }
        }
        self.last_prediction_at = Some(now);

        let forecast = match tokio::time::timeout(ML_CALL_DEADLINE, predictor.predict()).await {
            Ok(Ok(forecast)) => forecast,
            Ok(Err(e)) => {
                warn!("failure prediction failed: {}", e);
                return;
            }
            Err(_) => {
                warn!("failure predictor exceeded deadline, skipped");
                return;
            }
        };

        info!(
            probability = forecast.probability,
            risk = forecast.risk_level.as_str(),
            "failure forecast"
        );

        if forecast.risk_level == RiskLevel::Low {
            return;
        }

        if let Some(last) = self.last_risk_alert.get(&forecast.risk_level) {
            if now - *last < self.settings.prediction_realert {
                return;
            }
        }
        self.last_risk_alert.insert(forecast.risk_level, now);

        let severity = match forecast.risk_level {
            RiskLevel::High => Severity::Critical,
            _ => Severity::Warning,
        };

        let incident = Incident::new(
            IncidentKind::PredictedFailure,
            severity,
            json!({
                "probability": forecast.probability,
                "risk_level": forecast.risk_level.as_str(),
                "top_features": forecast.top_features,
            }),
        );

        // Advisory only: persisted and announced, never acted on.
        match self.store.log_incident(&incident, "infrastructure").await {
            Ok(_) => {
                self.hub.predicted_failure(
                    severity.into(),
                    forecast.probability,
                    forecast.risk_level.as_str(),
                );
            }
            Err(e) => error!("failed to log predicted-failure incident: {}", e),
        }
    }
}

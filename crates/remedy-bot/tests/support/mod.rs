//! Shared fixtures for the end-to-end scenario tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use remedy_actuate::{Actuator, ContainerRuntime, ContainerState};
use remedy_breaker::CircuitBreaker;
use remedy_bot::{Dependencies, Monitor, MonitorSettings, Strategy};
use remedy_common::{
    ActionKind, ActionOutcome, BreakerConfig, Clock, HealthFlags, HealthMetrics, HealthSnapshot,
    Incident, IncidentKind, IncidentStatus, ManualClock, Observation, Result, Severity,
    Thresholds, Trigger,
};
use remedy_detect::{Deduplicator, DetectorChain};
use remedy_notify::{ConsoleNotifier, NotificationHub};
use remedy_probe::Probe;
use remedy_store::{IncidentStore, RetentionSweeper, StoreStats};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredIncident {
    pub id: i64,
    pub kind: IncidentKind,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub details: serde_json::Value,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_secs: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct StoredAction {
    pub incident_id: Option<i64>,
    pub action: ActionKind,
    pub target: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct StoreInner {
    incidents: Vec<StoredIncident>,
    actions: Vec<StoredAction>,
    thresholds: Option<Thresholds>,
    next_id: i64,
}

/// In-memory stand-in for the Postgres store
pub struct InMemoryStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, inner: Mutex::new(StoreInner::default()) }
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) {
        self.inner.lock().thresholds = Some(thresholds);
    }

    pub fn incidents(&self) -> Vec<StoredIncident> {
        self.inner.lock().incidents.clone()
    }

    pub fn actions(&self) -> Vec<StoredAction> {
        self.inner.lock().actions.clone()
    }
}

#[async_trait]
impl IncidentStore for InMemoryStore {
    async fn log_incident(&self, incident: &Incident, affected_service: &str) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let timestamp = self.clock.now();
        inner.incidents.push(StoredIncident {
            id,
            kind: incident.kind,
            severity: incident.severity,
            status: IncidentStatus::Active,
            details: incident.details.clone(),
            service: affected_service.to_string(),
            timestamp,
            resolved_at: None,
            resolution_secs: None,
        });
        Ok(id)
    }

    async fn log_action(
        &self,
        incident_id: Option<i64>,
        action: ActionKind,
        target: &str,
        outcome: &ActionOutcome,
        _triggered_by: Trigger,
    ) -> Result<()> {
        let timestamp = self.clock.now();
        self.inner.lock().actions.push(StoredAction {
            incident_id,
            action,
            target: target.to_string(),
            success: outcome.success,
            error: outcome.error_message.clone(),
            timestamp,
        });
        Ok(())
    }

    async fn resolve_incident(&self, id: i64) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if let Some(incident) = inner.incidents.iter_mut().find(|i| i.id == id) {
            if incident.status == IncidentStatus::Active {
                incident.status = IncidentStatus::Resolved;
                incident.resolved_at = Some(now);
                incident.resolution_secs = Some((now - incident.timestamp).num_seconds().max(0));
            }
        }
        Ok(())
    }

    async fn escalate_incident(&self, id: i64, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(incident) = inner.incidents.iter_mut().find(|i| i.id == id) {
            if incident.status == IncidentStatus::Active {
                incident.status = IncidentStatus::Escalated;
                incident.details["escalation_reason"] = serde_json::json!(reason);
            }
        }
        Ok(())
    }

    async fn read_thresholds(&self) -> Result<Thresholds> {
        Ok(self.inner.lock().thresholds.clone().unwrap_or_default())
    }

    async fn read_breaker_config(&self) -> Result<Option<BreakerConfig>> {
        Ok(None)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
        let mut inner = self.inner.lock();
        let incidents_before = inner.incidents.len();
        let surviving: Vec<i64> = inner
            .incidents
            .iter()
            .filter(|i| i.timestamp >= cutoff)
            .map(|i| i.id)
            .collect();
        inner.incidents.retain(|i| i.timestamp >= cutoff);

        let actions_before = inner.actions.len();
        inner.actions.retain(|a| {
            a.timestamp >= cutoff
                && a.incident_id.map(|id| surviving.contains(&id)).unwrap_or(true)
        });

        Ok((
            (incidents_before - inner.incidents.len()) as u64,
            (actions_before - inner.actions.len()) as u64,
        ))
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats> {
        let inner = self.inner.lock();
        Ok(StoreStats {
            total_incidents: inner.incidents.len() as i64,
            total_actions: inner.actions.len() as i64,
            prune_eligible_incidents: inner
                .incidents
                .iter()
                .filter(|i| i.timestamp < cutoff)
                .count() as i64,
            prune_eligible_actions: inner
                .actions
                .iter()
                .filter(|a| a.timestamp < cutoff)
                .count() as i64,
            oldest_incident_at: inner.incidents.iter().map(|i| i.timestamp).min(),
        })
    }

    async fn reconcile_orphans(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let StoreInner { incidents, actions, .. } = &mut *inner;

        let mut resolved = 0;
        for incident in incidents.iter_mut() {
            if incident.status != IncidentStatus::Active {
                continue;
            }
            let last = actions
                .iter()
                .filter(|a| a.incident_id == Some(incident.id))
                .max_by_key(|a| a.timestamp);
            if last.map(|a| a.success).unwrap_or(false) {
                incident.status = IncidentStatus::Resolved;
                incident.resolved_at = Some(now);
                incident.resolution_secs = Some((now - incident.timestamp).num_seconds().max(0));
                resolved += 1;
            }
        }
        Ok(resolved)
    }
}

/// Probe replaying a queued script of observations
pub struct ScriptedProbe {
    queue: Mutex<VecDeque<Observation>>,
}

impl ScriptedProbe {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { queue: Mutex::new(observations.into()) }
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn observe(&self) -> Observation {
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| snapshot(HealthMetrics::default()))
    }
}

/// Runtime whose containers recover (or not) based on a toggle
pub struct ScriptedRuntime {
    healthy: AtomicBool,
    pub restarts: AtomicU32,
}

impl ScriptedRuntime {
    pub fn new(healthy: bool) -> Self {
        Self { healthy: AtomicBool::new(healthy), restarts: AtomicU32::new(0) }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn state(&self, _name: &str) -> Result<ContainerState> {
        Ok(if self.healthy.load(Ordering::SeqCst) {
            ContainerState::Running
        } else {
            ContainerState::Exited
        })
    }

    async fn restart(&self, _name: &str, _grace: Duration) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _name: &str, _grace: Duration) -> Result<()> {
        Ok(())
    }
}

pub fn snapshot(metrics: HealthMetrics) -> Observation {
    Observation::Snapshot(HealthSnapshot {
        service: Some("app".to_string()),
        timestamp: None,
        uptime_seconds: Some(600),
        metrics: Some(metrics),
        flags: HealthFlags::default(),
    })
}

pub fn cpu_snapshot(cpu_usage_percent: f64) -> Observation {
    snapshot(HealthMetrics { cpu_usage_percent, ..Default::default() })
}

pub fn error_rate_snapshot(error_rate: f64) -> Observation {
    snapshot(HealthMetrics { error_rate, ..Default::default() })
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub runtime: Arc<ScriptedRuntime>,
    pub breaker: Arc<CircuitBreaker>,
    pub monitor: Monitor,
}

pub struct HarnessOptions {
    pub observations: Vec<Observation>,
    pub runtime_healthy: bool,
    pub dedup_window_secs: i64,
    pub breaker: BreakerConfig,
    pub predictor: Option<Arc<dyn remedy_detect::FailurePredictor>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            observations: Vec::new(),
            runtime_healthy: true,
            dedup_window_secs: 60,
            breaker: BreakerConfig::default(),
            predictor: None,
        }
    }
}

pub fn build(options: HarnessOptions) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();

    let store = Arc::new(InMemoryStore::new(clock_dyn.clone()));
    let store_dyn: Arc<dyn IncidentStore> = store.clone();

    let runtime = Arc::new(ScriptedRuntime::new(options.runtime_healthy));
    let breaker = Arc::new(CircuitBreaker::new(options.breaker, clock_dyn.clone()));

    let settings = MonitorSettings {
        poll: Duration::from_secs(5),
        service_fallback: "app".to_string(),
        threshold_refresh_ticks: 10,
        cleanup_interval: chrono::Duration::hours(24),
        failure_check_interval: chrono::Duration::seconds(300),
        prediction_realert: chrono::Duration::minutes(10),
    };

    let deps = Dependencies {
        probe: Arc::new(ScriptedProbe::new(options.observations)),
        chain: DetectorChain::standard(),
        dedup: Deduplicator::with_window(
            chrono::Duration::seconds(options.dedup_window_secs),
            clock_dyn.clone(),
        ),
        strategy: Strategy::new("app".to_string()),
        breaker: breaker.clone(),
        actuator: Actuator::new(runtime.clone()),
        store: store_dyn.clone(),
        sweeper: RetentionSweeper::new(store_dyn, 180, clock_dyn.clone()),
        hub: NotificationHub::new(vec![Box::new(ConsoleNotifier)]),
        predictor: options.predictor,
        clock: clock_dyn,
    };

    let monitor = Monitor::new(settings, Thresholds::default(), deps);

    Harness { clock, store, runtime, breaker, monitor }
}

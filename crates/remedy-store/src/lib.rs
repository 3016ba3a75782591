//! Persistence for incidents, remediation actions and operator config
//!
//! Incidents and actions are append-only with resolution updates. Every
//! operation commits independently; there is no cross-record transactionality
//! in the control loop.

pub mod cleanup;
pub mod store;

pub use cleanup::{retention_cutoff, CleanupReport, RetentionSweeper};
pub use store::{Store, StoreStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remedy_common::{
    ActionKind, ActionOutcome, BreakerConfig, Incident, Result, Thresholds, Trigger,
};

/// Persistence contract used by the monitor loop
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Insert an incident with status ACTIVE; returns the generated id.
    async fn log_incident(&self, incident: &Incident, affected_service: &str) -> Result<i64>;

    /// Insert an action row. `incident_id` is required unless the action was
    /// triggered manually.
    async fn log_action(
        &self,
        incident_id: Option<i64>,
        action: ActionKind,
        target: &str,
        outcome: &ActionOutcome,
        triggered_by: Trigger,
    ) -> Result<()>;

    /// Mark an incident RESOLVED, recording when and how long it took.
    /// No-op when the incident is not ACTIVE.
    async fn resolve_incident(&self, id: i64) -> Result<()>;

    /// Mark an incident ESCALATED for human attention.
    async fn escalate_incident(&self, id: i64, reason: &str) -> Result<()>;

    /// Current detection thresholds, or built-in defaults when unset.
    async fn read_thresholds(&self) -> Result<Thresholds>;

    /// Circuit-breaker settings from the config table; `None` when unset so
    /// the caller can fall back to its environment-derived settings.
    async fn read_breaker_config(&self) -> Result<Option<BreakerConfig>>;

    /// Delete incidents (and their actions, by cascade) older than `cutoff`.
    /// Returns `(incidents_deleted, actions_deleted)`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64)>;

    /// Row counts and prune-eligible counts relative to `cutoff`.
    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats>;

    /// Resolve ACTIVE incidents whose most recent action succeeded before a
    /// restart of the bot. Returns the number of incidents resolved.
    async fn reconcile_orphans(&self) -> Result<u64>;
}

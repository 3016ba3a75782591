//! Retention cleanup
//!
//! Deletes incidents older than the retention period; action rows go with
//! their incident via the FK cascade. A failed sweep is reported, never
//! fatal to the monitor.

use chrono::{DateTime, Duration, Utc};
use remedy_common::{Clock, Result};
use std::sync::Arc;
use tracing::info;

use crate::IncidentStore;

/// Outcome of one retention sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub incidents_deleted: u64,
    pub actions_deleted: u64,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.incidents_deleted == 0 && self.actions_deleted == 0
    }
}

/// Records older than `now - retention_days` are eligible for deletion.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
    now - Duration::days(retention_days)
}

pub struct RetentionSweeper {
    store: Arc<dyn IncidentStore>,
    retention_days: i64,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn IncidentStore>, retention_days: i64, clock: Arc<dyn Clock>) -> Self {
        Self { store, retention_days, clock }
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    pub async fn run(&self) -> Result<CleanupReport> {
        let cutoff = retention_cutoff(self.clock.now(), self.retention_days);

        let stats = self.store.stats(cutoff).await?;
        info!(
            total_incidents = stats.total_incidents,
            total_actions = stats.total_actions,
            prune_eligible = stats.prune_eligible_incidents,
            "starting retention sweep for records older than {}",
            cutoff
        );

        if stats.prune_eligible_incidents == 0 && stats.prune_eligible_actions == 0 {
            info!("no records past retention");
            return Ok(CleanupReport { incidents_deleted: 0, actions_deleted: 0 });
        }

        let (incidents_deleted, actions_deleted) = self.store.delete_older_than(cutoff).await?;
        info!(incidents_deleted, actions_deleted, "retention sweep finished");

        Ok(CleanupReport { incidents_deleted, actions_deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_is_exactly_retention_days_back() {
        let now = "2026-07-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let cutoff = retention_cutoff(now, 180);
        assert_eq!(cutoff, "2026-01-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap());

        // A record 181 days old is eligible, one 10 days old is not.
        assert!(now - Duration::days(181) < cutoff);
        assert!(now - Duration::days(10) >= cutoff);
    }
}

//! Postgres-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remedy_common::{
    ActionKind, ActionOutcome, BreakerConfig, Clock, Error, Incident, Result, Thresholds, Trigger,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::IncidentStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS incidents (
    id BIGSERIAL PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    type VARCHAR(50) NOT NULL,
    severity VARCHAR(20) NOT NULL,
    details JSONB NOT NULL DEFAULT '{}'::jsonb,
    status VARCHAR(20) NOT NULL DEFAULT 'ACTIVE',
    resolved_at TIMESTAMPTZ,
    resolution_time_seconds BIGINT,
    affected_service VARCHAR(100)
);

CREATE TABLE IF NOT EXISTS remediation_actions (
    id BIGSERIAL PRIMARY KEY,
    incident_id BIGINT REFERENCES incidents(id) ON DELETE CASCADE,
    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    action_type VARCHAR(50) NOT NULL,
    target VARCHAR(100) NOT NULL,
    success BOOLEAN NOT NULL,
    error_message TEXT,
    execution_time_ms BIGINT,
    triggered_by VARCHAR(50) NOT NULL DEFAULT 'bot',
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE TABLE IF NOT EXISTS config (
    key VARCHAR(100) PRIMARY KEY,
    value JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_by VARCHAR(100) NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_incidents_timestamp ON incidents (timestamp);
CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents (status);
CREATE INDEX IF NOT EXISTS idx_actions_incident ON remediation_actions (incident_id);
CREATE INDEX IF NOT EXISTS idx_actions_timestamp ON remediation_actions (timestamp);
"#;

/// Database statistics gathered before a retention sweep
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_incidents: i64,
    pub total_actions: i64,
    pub prune_eligible_incidents: i64,
    pub prune_eligible_actions: i64,
    pub oldest_incident_at: Option<DateTime<Utc>>,
}

pub struct Store {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Connect with bounded retries; an unreachable database after the last
    /// attempt is an unrecoverable startup failure for the caller.
    pub async fn connect(url: &str, attempts: u32, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut last_error = None;

        for attempt in 1..=attempts {
            match PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("database connection established");
                    return Ok(Self { pool, clock });
                }
                Err(e) => {
                    warn!(attempt, attempts, "database connection failed: {}", e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }

        Err(Error::Store(format!(
            "database unreachable after {} attempts: {}",
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Create tables and indexes when they do not exist yet.
    pub async fn bootstrap(&self) -> Result<()> {
        // Plain-string execute runs unprepared, so the multi-statement
        // schema goes through in one round trip.
        self.pool
            .execute(SCHEMA)
            .await
            .map_err(|e| Error::Store(format!("schema bootstrap failed: {}", e)))?;
        info!("database schema ready");
        Ok(())
    }

    async fn read_config_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("config read for '{}' failed: {}", key, e)))?;

        Ok(row.map(|r| r.get::<serde_json::Value, _>("value")))
    }
}

#[async_trait]
impl IncidentStore for Store {
    async fn log_incident(&self, incident: &Incident, affected_service: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO incidents (timestamp, type, severity, details, status, affected_service)
            VALUES ($1, $2, $3, $4, 'ACTIVE', $5)
            RETURNING id
            "#,
        )
        .bind(self.clock.now())
        .bind(incident.kind.as_str())
        .bind(incident.severity.as_str())
        .bind(&incident.details)
        .bind(affected_service)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("failed to log incident: {}", e)))?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn log_action(
        &self,
        incident_id: Option<i64>,
        action: ActionKind,
        target: &str,
        outcome: &ActionOutcome,
        triggered_by: Trigger,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO remediation_actions
                (incident_id, timestamp, action_type, target, success,
                 error_message, execution_time_ms, triggered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(incident_id)
        .bind(self.clock.now())
        .bind(action.as_str())
        .bind(target)
        .bind(outcome.success)
        .bind(outcome.error_message.as_deref())
        .bind(outcome.execution_time_ms)
        .bind(triggered_by.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("failed to log action: {}", e)))?;

        Ok(())
    }

    async fn resolve_incident(&self, id: i64) -> Result<()> {
        let row = sqlx::query("SELECT timestamp, status FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("failed to read incident {}: {}", id, e)))?;

        let Some(row) = row else {
            warn!(incident_id = id, "resolve requested for unknown incident");
            return Ok(());
        };

        let status: String = row.get("status");
        if status != "ACTIVE" {
            return Ok(());
        }

        let opened_at: DateTime<Utc> = row.get("timestamp");
        let now = self.clock.now();
        let resolution_secs = (now - opened_at).num_seconds().max(0);

        sqlx::query(
            r#"
            UPDATE incidents
            SET status = 'RESOLVED', resolved_at = $2, resolution_time_seconds = $3
            WHERE id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(resolution_secs)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("failed to resolve incident {}: {}", id, e)))?;

        info!(incident_id = id, resolution_secs, "incident resolved");
        Ok(())
    }

    async fn escalate_incident(&self, id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE incidents
            SET status = 'ESCALATED',
                details = details || jsonb_build_object('escalation_reason', $2::text)
            WHERE id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("failed to escalate incident {}: {}", id, e)))?;

        warn!(incident_id = id, reason, "incident escalated");
        Ok(())
    }

    async fn read_thresholds(&self) -> Result<Thresholds> {
        match self.read_config_value("thresholds").await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(thresholds) => Ok(thresholds),
                Err(e) => {
                    warn!("malformed thresholds config, using defaults: {}", e);
                    Ok(Thresholds::default())
                }
            },
            None => Ok(Thresholds::default()),
        }
    }

    async fn read_breaker_config(&self) -> Result<Option<BreakerConfig>> {
        match self.read_config_value("circuit_breaker").await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(config) => Ok(Some(config)),
                Err(e) => {
                    warn!("malformed circuit_breaker config, ignoring: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
        // Incident deletion cascades to child actions; the second statement
        // only catches orphan action rows with no surviving parent.
        let incidents = sqlx::query("DELETE FROM incidents WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("failed to delete old incidents: {}", e)))?
            .rows_affected();

        let actions = sqlx::query("DELETE FROM remediation_actions WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("failed to delete old actions: {}", e)))?
            .rows_affected();

        Ok((incidents, actions))
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM incidents) AS total_incidents,
                (SELECT COUNT(*) FROM remediation_actions) AS total_actions,
                (SELECT COUNT(*) FROM incidents WHERE timestamp < $1) AS old_incidents,
                (SELECT COUNT(*) FROM remediation_actions WHERE timestamp < $1) AS old_actions,
                (SELECT MIN(timestamp) FROM incidents) AS oldest_incident
            "#,
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("failed to gather store stats: {}", e)))?;

        Ok(StoreStats {
            total_incidents: row.get("total_incidents"),
            total_actions: row.get("total_actions"),
            prune_eligible_incidents: row.get("old_incidents"),
            prune_eligible_actions: row.get("old_actions"),
            oldest_incident_at: row.get("oldest_incident"),
        })
    }

    async fn reconcile_orphans(&self) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            SELECT i.id FROM incidents i
            WHERE i.status = 'ACTIVE'
              AND EXISTS (
                SELECT 1 FROM remediation_actions a
                WHERE a.incident_id = i.id
                  AND a.success
                  AND a.timestamp = (
                    SELECT MAX(a2.timestamp) FROM remediation_actions a2
                    WHERE a2.incident_id = i.id
                  )
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("orphan scan failed: {}", e)))?;

        let mut resolved = 0u64;
        for row in rows {
            let id: i64 = row.get("id");
            self.resolve_incident(id).await?;
            resolved += 1;
        }

        if resolved > 0 {
            info!(resolved, "reconciled orphan incidents from before restart");
        }
        Ok(resolved)
    }
}

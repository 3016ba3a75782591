//! Incident deduplication
//!
//! Dedup is by incident type only, not by (type, details). Coarsening is
//! intentional: during a sustained breach every tick re-detects the same
//! condition and the pipeline must not flood the store and the notifier.

use chrono::{DateTime, Duration, Utc};
use remedy_common::{Clock, IncidentKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default suppression window
pub const DEDUP_WINDOW_SECS: i64 = 60;

pub struct Deduplicator {
    window: Duration,
    last_seen: HashMap<IncidentKind, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl Deduplicator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_window(Duration::seconds(DEDUP_WINDOW_SECS), clock)
    }

    pub fn with_window(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { window, last_seen: HashMap::new(), clock }
    }

    /// Returns true when the incident should pass through, recording the
    /// sighting. Returns false when a same-typed incident was admitted
    /// within the window.
    pub fn admit(&mut self, kind: IncidentKind) -> bool {
        let now = self.clock.now();

        if let Some(last) = self.last_seen.get(&kind) {
            let age = now - *last;
            if age < self.window {
                debug!(kind = %kind, age_secs = age.num_seconds(), "incident deduplicated");
                return false;
            }
        }

        self.last_seen.insert(kind, now);
        true
    }
}

//! Per-target circuit breaker for remediation actions
//!
//! The breaker suppresses action storms against a single container. Its
//! history counts *attempts*, not failures: sustained attempt frequency trips
//! the breaker regardless of outcome, because fast oscillation is itself a
//! failure mode. Do not change this to failure-only counting.
//!
//! State machine per target:
//! - `CLOSED`: attempts pass while the sliding window holds capacity.
//! - `OPEN`: everything blocks until the cooldown elapses.
//! - `HALF_OPEN`: entered when the cooldown elapses; exactly one probe
//!   attempt is allowed through. Success closes the circuit, failure
//!   re-opens it with a fresh cooldown.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use remedy_common::{ActionKind, BreakerConfig, Clock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on retained attempt history per target
const HISTORY_CAPACITY: usize = 100;

/// Circuit states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("CLOSED"),
            BreakerState::Open => f.write_str("OPEN"),
            BreakerState::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Outcome of a gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Block { reason: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Point-in-time view of one target's breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: Option<i64>,
    pub attempts_in_window: usize,
}

#[derive(Debug)]
struct TargetState {
    state: BreakerState,
    opened_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    failure_count: u32,
    history: VecDeque<(ActionKind, DateTime<Utc>)>,
}

impl TargetState {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            opened_at: None,
            last_attempt_at: None,
            failure_count: 0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    fn evict_outside(&mut self, cutoff: DateTime<Utc>) {
        while let Some((_, t)) = self.history.front() {
            if *t < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Registry of per-target circuit breakers
///
/// Mutations on a single target are serialized by a per-entry mutex; distinct
/// targets proceed independently.
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    targets: RwLock<HashMap<String, Arc<Mutex<TargetState>>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, targets: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn entry(&self, target: &str) -> Arc<Mutex<TargetState>> {
        if let Some(entry) = self.targets.read().get(target) {
            return entry.clone();
        }
        self.targets
            .write()
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TargetState::new())))
            .clone()
    }

    /// Check whether an action against `target` may proceed.
    pub fn gate(&self, target: &str, action: ActionKind) -> GateDecision {
        let entry = self.entry(target);
        let mut state = entry.lock();
        let now = self.clock.now();

        if state.state == BreakerState::Open {
            let opened_at = state.opened_at.unwrap_or(now);
            let elapsed = now - opened_at;
            let cooldown = Duration::seconds(self.config.cooldown_seconds as i64);

            if elapsed < cooldown {
                let remaining = (cooldown - elapsed).num_seconds();
                let reason = format!(
                    "circuit OPEN for {}: cooldown {}s remaining",
                    target, remaining
                );
                warn!("{}", reason);
                return GateDecision::Block { reason };
            }

            // Cooldown elapsed: let exactly one probe attempt through.
            info!("circuit transitioning to HALF_OPEN for {}", target);
            state.state = BreakerState::HalfOpen;
            return GateDecision::Allow;
        }

        if state.state == BreakerState::HalfOpen {
            return GateDecision::Allow;
        }

        let cutoff = now - Duration::seconds(self.config.window_seconds as i64);
        state.evict_outside(cutoff);

        if state.history.len() >= self.config.max_failures as usize {
            state.state = BreakerState::Open;
            state.opened_at = Some(now);
            let reason = format!(
                "circuit OPEN for {}: {} {} attempts in last {}s (max {})",
                target,
                state.history.len(),
                action,
                self.config.window_seconds,
                self.config.max_failures
            );
            warn!("{}", reason);
            return GateDecision::Block { reason };
        }

        GateDecision::Allow
    }

    /// Record an attempt and its outcome.
    pub fn record(&self, target: &str, action: ActionKind, success: bool) {
        let entry = self.entry(target);
        let mut state = entry.lock();
        let now = self.clock.now();

        if state.history.len() == HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back((action, now));
        state.last_attempt_at = Some(now);

        match (state.state, success) {
            (BreakerState::HalfOpen, true) => {
                info!("circuit CLOSED for {} after successful probe", target);
                state.state = BreakerState::Closed;
                state.opened_at = None;
                state.failure_count = 0;
            }
            (BreakerState::HalfOpen, false) => {
                warn!("probe failed, circuit re-OPENED for {}", target);
                state.state = BreakerState::Open;
                state.opened_at = Some(now);
                state.failure_count += 1;
            }
            (_, false) => {
                state.failure_count += 1;
            }
            (_, true) => {}
        }
    }

    /// Administrative reset: close the circuit and forget history.
    pub fn reset(&self, target: &str) {
        let entry = self.entry(target);
        let mut state = entry.lock();
        info!("circuit breaker reset for {}", target);
        *state = TargetState::new();
    }

    pub fn snapshot(&self, target: &str) -> Option<BreakerSnapshot> {
        let entry = self.targets.read().get(target)?.clone();
        let state = entry.lock();
        let now = self.clock.now();

        let cooldown_remaining_secs = state.opened_at.map(|opened| {
            let cooldown = Duration::seconds(self.config.cooldown_seconds as i64);
            (cooldown - (now - opened)).num_seconds().max(0)
        });

        Some(BreakerSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            opened_at: state.opened_at,
            last_attempt_at: state.last_attempt_at,
            cooldown_remaining_secs,
            attempts_in_window: state
                .history
                .iter()
                .filter(|(_, t)| {
                    *t >= now - Duration::seconds(self.config.window_seconds as i64)
                })
                .count(),
        })
    }

    pub fn snapshot_all(&self) -> HashMap<String, BreakerSnapshot> {
        let targets: Vec<String> = self.targets.read().keys().cloned().collect();
        targets
            .into_iter()
            .filter_map(|t| self.snapshot(&t).map(|s| (t, s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_common::ManualClock;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig { max_failures: 3, window_seconds: 300, cooldown_seconds: 120 },
            clock,
        )
    }

    const RESTART: ActionKind = ActionKind::RestartContainer;

    #[test]
    fn allows_until_window_capacity_reached() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            assert!(cb.gate("app", RESTART).is_allowed());
            cb.record("app", RESTART, false);
            clock.advance_secs(10);
        }

        match cb.gate("app", RESTART) {
            GateDecision::Block { reason } => assert!(reason.contains("circuit OPEN")),
            GateDecision::Allow => panic!("expected the breaker to trip"),
        }
        assert_eq!(cb.snapshot("app").unwrap().state, BreakerState::Open);
    }

    #[test]
    fn successful_attempts_also_count_toward_the_window() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            assert!(cb.gate("app", RESTART).is_allowed());
            cb.record("app", RESTART, true);
            clock.advance_secs(10);
        }

        assert!(!cb.gate("app", RESTART).is_allowed());
    }

    #[test]
    fn blocks_during_cooldown_with_remaining_seconds() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record("app", RESTART, false);
        }
        assert!(!cb.gate("app", RESTART).is_allowed());

        clock.advance_secs(60);
        match cb.gate("app", RESTART) {
            GateDecision::Block { reason } => {
                assert!(reason.contains("cooldown"));
                assert!(reason.contains("60s"));
            }
            GateDecision::Allow => panic!("expected block during cooldown"),
        }
    }

    #[test]
    fn cooldown_elapse_allows_a_half_open_probe() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record("app", RESTART, false);
        }
        assert!(!cb.gate("app", RESTART).is_allowed());

        clock.advance_secs(121);
        assert!(cb.gate("app", RESTART).is_allowed());
        assert_eq!(cb.snapshot("app").unwrap().state, BreakerState::HalfOpen);
    }

    #[test]
    fn successful_probe_closes_and_clears_failures() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record("app", RESTART, false);
        }
        let _ = cb.gate("app", RESTART);
        clock.advance_secs(121);
        assert!(cb.gate("app", RESTART).is_allowed());

        cb.record("app", RESTART, true);
        let snapshot = cb.snapshot("app").unwrap();
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.opened_at.is_none());
    }

    #[test]
    fn failed_probe_reopens_with_fresh_cooldown() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record("app", RESTART, false);
        }
        let _ = cb.gate("app", RESTART);
        clock.advance_secs(121);
        assert!(cb.gate("app", RESTART).is_allowed());

        cb.record("app", RESTART, false);
        assert_eq!(cb.snapshot("app").unwrap().state, BreakerState::Open);
        assert!(!cb.gate("app", RESTART).is_allowed());
    }

    #[test]
    fn window_eviction_restores_capacity() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock.clone());

        cb.record("app", RESTART, true);
        cb.record("app", RESTART, true);
        clock.advance_secs(301);
        cb.record("app", RESTART, true);

        // Two of the three attempts have aged out of the window.
        assert!(cb.gate("app", RESTART).is_allowed());
    }

    #[test]
    fn targets_trip_independently() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock);

        for _ in 0..3 {
            cb.record("app", RESTART, false);
        }
        assert!(!cb.gate("app", RESTART).is_allowed());
        assert!(cb.gate("app-replica", ActionKind::StartReplica).is_allowed());
    }

    #[test]
    fn reset_closes_and_forgets_history() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = breaker(clock);

        for _ in 0..3 {
            cb.record("app", RESTART, false);
        }
        assert!(!cb.gate("app", RESTART).is_allowed());

        cb.reset("app");
        let snapshot = cb.snapshot("app").unwrap();
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.attempts_in_window, 0);
        assert!(cb.gate("app", RESTART).is_allowed());
    }

    #[test]
    fn history_is_bounded() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cb = CircuitBreaker::new(
            BreakerConfig { max_failures: 1000, window_seconds: 10_000, cooldown_seconds: 120 },
            clock,
        );

        for _ in 0..150 {
            cb.record("app", RESTART, true);
        }
        assert_eq!(cb.snapshot("app").unwrap().attempts_in_window, 100);
    }
}

//! Action execution with post-state verification
//!
//! Success is defined by the target's observed state after the runtime call,
//! not by the call returning. Operations are idempotent where safe: starting
//! a running replica and stopping a stopped one succeed without touching the
//! runtime; a restart always restarts.

use remedy_common::{ActionKind, ActionOutcome, Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::runtime::{ContainerRuntime, ContainerState};

/// Grace period handed to the runtime for restart/stop
pub const GRACE_TIMEOUT: Duration = Duration::from_secs(10);

/// Settle time before the post-state is read back
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct Actuator {
    runtime: Arc<dyn ContainerRuntime>,
    grace: Duration,
    settle: Duration,
}

impl Actuator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime, grace: GRACE_TIMEOUT, settle: SETTLE_DELAY }
    }

    #[cfg(test)]
    fn with_timing(runtime: Arc<dyn ContainerRuntime>, grace: Duration, settle: Duration) -> Self {
        Self { runtime, grace, settle }
    }

    /// Dispatch an action against a target container.
    pub async fn execute(&self, action: ActionKind, target: &str) -> ActionOutcome {
        let outcome = match action {
            ActionKind::RestartContainer => self.restart_container(target).await,
            ActionKind::StartReplica => self.start_replica(target).await,
            ActionKind::StopReplica => self.stop_replica(target).await,
            ActionKind::ScaleReplicas => {
                warn!("scale_replicas is not implemented for a single-host runtime");
                ActionOutcome::failed("scaling not implemented", 0)
            }
        };

        if outcome.success {
            info!(
                action = %action,
                container = target,
                elapsed_ms = outcome.execution_time_ms,
                "action succeeded"
            );
        } else {
            error!(
                action = %action,
                container = target,
                error = outcome.error_message.as_deref().unwrap_or("unknown"),
                "action failed"
            );
        }

        outcome
    }

    pub async fn restart_container(&self, target: &str) -> ActionOutcome {
        let started = Instant::now();

        match self.try_restart(target).await {
            Ok(()) => ActionOutcome::succeeded(elapsed_ms(started)),
            Err(e) => ActionOutcome::failed(e.to_string(), elapsed_ms(started)),
        }
    }

    async fn try_restart(&self, target: &str) -> Result<()> {
        // Resolve the container first so a missing target fails typed.
        self.runtime.state(target).await?;
        self.runtime.restart(target, self.grace).await?;

        let after = self.settle_and_inspect(target).await?;
        if after == ContainerState::Running {
            Ok(())
        } else {
            Err(Error::Runtime(format!(
                "container '{}' not running after restart (state: {})",
                target, after
            )))
        }
    }

    pub async fn start_replica(&self, target: &str) -> ActionOutcome {
        let started = Instant::now();

        match self.try_start(target).await {
            Ok(()) => ActionOutcome::succeeded(elapsed_ms(started)),
            Err(e) => ActionOutcome::failed(e.to_string(), elapsed_ms(started)),
        }
    }

    async fn try_start(&self, target: &str) -> Result<()> {
        let current = self.runtime.state(target).await?;
        if current == ContainerState::Running {
            info!(container = target, "replica already running");
            return Ok(());
        }

        self.runtime.start(target).await?;

        let after = self.settle_and_inspect(target).await?;
        if after == ContainerState::Running {
            Ok(())
        } else {
            Err(Error::Runtime(format!(
                "replica '{}' not running after start (state: {})",
                target, after
            )))
        }
    }

    pub async fn stop_replica(&self, target: &str) -> ActionOutcome {
        let started = Instant::now();

        match self.try_stop(target).await {
            Ok(()) => ActionOutcome::succeeded(elapsed_ms(started)),
            Err(e) => ActionOutcome::failed(e.to_string(), elapsed_ms(started)),
        }
    }

    async fn try_stop(&self, target: &str) -> Result<()> {
        let current = self.runtime.state(target).await?;
        if current.is_stopped() {
            info!(container = target, "replica already stopped");
            return Ok(());
        }

        self.runtime.stop(target, self.grace).await?;

        let after = self.settle_and_inspect(target).await?;
        if after.is_stopped() {
            Ok(())
        } else {
            Err(Error::Runtime(format!(
                "replica '{}' still {} after stop",
                target, after
            )))
        }
    }

    async fn settle_and_inspect(&self, target: &str) -> Result<ContainerState> {
        tokio::time::sleep(self.settle).await;
        self.runtime.state(target).await
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

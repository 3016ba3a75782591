//! Auto-remediation bot
//!
//! Orchestrates the closed-loop control pipeline: probe the monitored
//! service, classify breaches into incidents, decide a remediation action,
//! gate it through the circuit breaker, execute it against the container
//! runtime, and persist the outcome.

pub mod monitor;
pub mod strategy;

pub use monitor::{Dependencies, Monitor, MonitorSettings};
pub use strategy::{ActionPlan, Strategy};

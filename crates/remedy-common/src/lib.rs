//! Common types and utilities for the remedy control plane
//!
//! This crate provides the shared data model, error taxonomy, environment
//! configuration and clock abstraction used across all components of the
//! auto-remediation bot.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BotConfig, BreakerConfig, Thresholds};
pub use error::{Error, Result};
pub use types::*;

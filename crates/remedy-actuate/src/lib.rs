//! Remediation actuator for the remedy control plane
//!
//! Executes restart/start/stop actions against a container runtime and
//! verifies the post-state before reporting success.

pub mod actuator;
pub mod runtime;

pub use actuator::{Actuator, GRACE_TIMEOUT, SETTLE_DELAY};
pub use runtime::{ContainerRuntime, ContainerState, DockerRuntime};

//! Container runtime abstraction and Docker implementation

use async_trait::async_trait;
use bollard::container::{RestartContainerOptions, StartContainerOptions, StopContainerOptions};
use bollard::models::ContainerStateStatusEnum;
use bollard::Docker;
use remedy_common::{Error, Result};
use std::time::Duration;
use tracing::{debug, info};

/// Observed container lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited,
    Created,
    Paused,
    Restarting,
    Removing,
    Dead,
    Unknown,
}

impl ContainerState {
    /// Whether the container counts as stopped for stop-verification
    pub fn is_stopped(&self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Created | ContainerState::Dead)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
            ContainerState::Created => "created",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Minimal runtime surface the actuator needs
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Current state of a container; `Error::NotFound` when it does not exist
    async fn state(&self, name: &str) -> Result<ContainerState>;

    async fn restart(&self, name: &str, grace: Duration) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str, grace: Duration) -> Result<()>;
}

/// Docker implementation over the local daemon socket
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Runtime(format!("failed to connect to Docker: {}", e)))?;
        Ok(Self { client })
    }

    /// Liveness of the daemon itself
    pub async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::Runtime(format!("Docker ping failed: {}", e)))
    }

    fn map_error(name: &str, e: bollard::errors::Error) -> Error {
        match e {
            bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                Error::NotFound(name.to_string())
            }
            other => Error::Runtime(format!("runtime call for '{}' failed: {}", name, other)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn state(&self, name: &str) -> Result<ContainerState> {
        let inspect = self
            .client
            .inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|e| Self::map_error(name, e))?;

        let status = inspect
            .state
            .and_then(|s| s.status)
            .unwrap_or(ContainerStateStatusEnum::EMPTY);

        let state = match status {
            ContainerStateStatusEnum::RUNNING => ContainerState::Running,
            ContainerStateStatusEnum::EXITED => ContainerState::Exited,
            ContainerStateStatusEnum::CREATED => ContainerState::Created,
            ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
            ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
            ContainerStateStatusEnum::REMOVING => ContainerState::Removing,
            ContainerStateStatusEnum::DEAD => ContainerState::Dead,
            ContainerStateStatusEnum::EMPTY => ContainerState::Unknown,
        };

        debug!(container = name, state = %state, "inspected container");
        Ok(state)
    }

    async fn restart(&self, name: &str, grace: Duration) -> Result<()> {
        info!(container = name, "restarting container");
        let options = RestartContainerOptions { t: grace.as_secs() as isize };
        self.client
            .restart_container(name, Some(options))
            .await
            .map_err(|e| Self::map_error(name, e))
    }

    async fn start(&self, name: &str) -> Result<()> {
        info!(container = name, "starting container");
        self.client
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::map_error(name, e))
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<()> {
        info!(container = name, "stopping container");
        let options = StopContainerOptions { t: grace.as_secs() as i64 };
        self.client
            .stop_container(name, Some(options))
            .await
            .map_err(|e| Self::map_error(name, e))
    }
}

//! Health probe for the monitored service
//!
//! Performs a single bounded-time request per tick against the service's
//! health endpoint. The probe never retries; the monitor loop's cadence
//! supplies retry semantics. A probe failure is not an incident by itself,
//! it is input to the health-check detector.

use async_trait::async_trait;
use remedy_common::{Error, HealthSnapshot, Observation, ProbeFailure, Result};
use std::time::Duration;
use tracing::debug;

/// Hard deadline for one probe request
pub const PROBE_DEADLINE: Duration = Duration::from_secs(3);

/// Source of health observations
#[async_trait]
pub trait Probe: Send + Sync {
    async fn observe(&self) -> Observation;
}

/// HTTP health probe against `{app_host}/api/health`
pub struct HealthProbe {
    client: reqwest::Client,
    endpoint: String,
}

impl HealthProbe {
    pub fn new(app_host: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_DEADLINE)
            .build()
            .map_err(|e| Error::Probe(format!("failed to build probe client: {}", e)))?;

        let endpoint = format!("{}/api/health", app_host.trim_end_matches('/'));
        Ok(Self { client, endpoint })
    }

    async fn fetch(&self) -> std::result::Result<HealthSnapshot, ProbeFailure> {
        let response = self.client.get(&self.endpoint).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeFailure::Timeout
            } else if e.is_connect() {
                ProbeFailure::ConnectionRefused
            } else {
                ProbeFailure::Other(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::Http(status.as_u16()));
        }

        response
            .json::<HealthSnapshot>()
            .await
            .map_err(|_| ProbeFailure::MalformedBody)
    }
}

#[async_trait]
impl Probe for HealthProbe {
    async fn observe(&self) -> Observation {
        match self.fetch().await {
            Ok(snapshot) => Observation::Snapshot(snapshot),
            Err(failure) => {
                debug!("health probe failed: {}", failure);
                Observation::ProbeFailed(failure)
            }
        }
    }
}

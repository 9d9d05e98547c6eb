// SPDX-License-Identifier: MIT

//! Availability probes for the external dependency stages call into

use async_trait::async_trait;
use std::time::Duration;

use super::error::FlowError;

/// Boolean availability check, run once before a workflow starts
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Name of the dependency being probed (used in log lines and notes)
    fn name(&self) -> &str {
        "dependency"
    }

    /// Returns true when the dependency is reachable
    async fn check(&self) -> bool;
}

/// Probe that issues a GET against a health endpoint
pub struct HttpHealthProbe {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Create a probe whose HTTP client gives up after `timeout`
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FlowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlowError::config(format!("failed to build probe client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                log::warn!(
                    "Health probe {} returned status {}",
                    self.name,
                    resp.status()
                );
                false
            }
            Err(e) => {
                log::warn!("Health probe {} failed: {}", self.name, e);
                false
            }
        }
    }
}

/// Probe with a fixed answer, for offline runs and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    available: bool,
}

impl StaticProbe {
    pub fn available() -> Self {
        Self { available: true }
    }

    pub fn unavailable() -> Self {
        Self { available: false }
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn name(&self) -> &str {
        "static"
    }

    async fn check(&self) -> bool {
        self.available
    }
}

//! Health probing for companion services.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::types::SupervisorError;

/// Checks whether a service answers its health endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, url: &str) -> bool;
}

/// Probe that issues `GET <url>` and treats any 2xx response as healthy.
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, SupervisorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SupervisorError::Probe(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                if !healthy {
                    debug!(url, status = %response.status(), "Health check returned non-success");
                }
                healthy
            }
            Err(e) => {
                debug!(url, error = %e, "Health check request failed");
                false
            }
        }
    }
}

//! Gateway liveness probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::trace;

use super::error::SupervisorError;
use crate::gateway::PING_TOKEN;

/// Answers whether the gateway is accepting requests.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One probe attempt. Never blocks longer than the probe's own timeout.
    async fn probe(&self) -> bool;
}

/// `GET /__proxy_ping` must return `200` with body `PONG`.
pub struct HttpPingProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpPingProbe {
    /// Probe `url` with a per-attempt timeout.
    ///
    /// The client ignores proxy environment variables: it must reach the
    /// gateway directly.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SupervisorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| SupervisorError::Probe(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReadinessProbe for HttpPingProbe {
    async fn probe(&self) -> bool {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => {
                trace!("Probe {} failed: {}", self.url, e);
                return false;
            }
        };

        if response.status() != StatusCode::OK {
            trace!("Probe {} returned {}", self.url, response.status());
            return false;
        }

        match response.text().await {
            Ok(body) => body.trim() == PING_TOKEN,
            Err(e) => {
                trace!("Probe {} body unreadable: {}", self.url, e);
                false
            }
        }
    }
}

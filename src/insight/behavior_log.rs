//! Behavior-logging client
//!
//! Posts every analysis payload to a logging endpoint. A backend may answer with an
//! insight of its own; anything else in the response body is ignored.

use crate::config::BehaviorLogConfig;
use crate::error::GuideError;
use crate::types::{BehaviorAnalysis, Insight};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BehaviorLogClient {
    client: Client,
    config: BehaviorLogConfig,
}

impl BehaviorLogClient {
    pub fn new(config: BehaviorLogConfig) -> Result<Self, GuideError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GuideError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Post the analysis. Returns the backend's insight when the response carries one.
    pub async fn submit(&self, analysis: &BehaviorAnalysis) -> Result<Option<Insight>, GuideError> {
        let response = self.client.post(&self.config.endpoint).json(analysis).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GuideError::RemoteStatus(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(parse_log_response(&body))
    }
}

/// Interpret a behavior-log response body as an optional insight
pub fn parse_log_response(body: &str) -> Option<Insight> {
    if body.trim().is_empty() {
        return None;
    }
    match Insight::from_json(body) {
        Ok(insight) => Some(insight),
        Err(e) => {
            debug!(error = %e, "behavior log response is not an insight");
            None
        }
    }
}

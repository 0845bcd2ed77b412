//! HTTP client for the sensor API

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{DrytimeError, Result};

/// Fetches raw sample and threshold payloads as JSON
#[derive(Debug, Clone)]
pub struct SensorClient {
    client: Client,
    data_url: String,
    threshold_url: String,
}

impl SensorClient {
    /// Creates a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns `DrytimeError::Fetch` if the HTTP client cannot be built.
    pub fn new(
        data_url: impl Into<String>,
        threshold_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            data_url: data_url.into(),
            threshold_url: threshold_url.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.data_url.clone(),
            config.threshold_url.clone(),
            Duration::from_secs(config.fetch_timeout_secs),
        )
    }

    /// Raw sample payload
    pub async fn fetch_samples(&self) -> Result<Value> {
        self.get_json(&self.data_url).await
    }

    /// Raw threshold payload
    pub async fn fetch_threshold(&self) -> Result<Value> {
        self.get_json(&self.threshold_url).await
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!(url, "Fetching");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DrytimeError::Fetch(format!("GET {} returned {}", url, status)));
        }
        let body: Value = response.json().await?;
        info!(url, status = status.as_u16(), "Fetched payload");
        Ok(body)
    }
}

//! InfluxDB 0.8 series API writer

use crate::ingest::BackendWriter;
use crate::models::OutputPoint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection settings for the InfluxDB backend
#[derive(Debug, Clone)]
pub struct InfluxDbConfig {
    /// `host:port` of the InfluxDB HTTP API
    pub host: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub https: bool,
    pub timeout: Duration,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8086".to_string(),
            username: "root".to_string(),
            password: "root".to_string(),
            database: String::new(),
            https: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// One series in the write body; every point travels as its own series
#[derive(Debug, Serialize)]
struct Series<'a> {
    name: &'a str,
    columns: [&'static str; 3],
    points: [serde_json::Value; 1],
}

impl<'a> From<&'a OutputPoint> for Series<'a> {
    fn from(point: &'a OutputPoint) -> Self {
        Self {
            name: &point.name,
            columns: ["time", "value", "host"],
            points: [json!([point.timestamp_ms, point.value, point.host])],
        }
    }
}

/// Writes point batches to InfluxDB over HTTP
pub struct InfluxDbWriter {
    client: Client,
    base_url: Url,
    config: InfluxDbConfig,
}

impl InfluxDbWriter {
    pub fn new(config: InfluxDbConfig) -> Result<Self> {
        let scheme = if config.https { "https" } else { "http" };
        let base_url = Url::parse(&format!("{}://{}/", scheme, config.host))
            .with_context(|| format!("Invalid InfluxDB host: {}", config.host))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create InfluxDB HTTP client")?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Handshake against `GET /ping`
    pub async fn ping(&self) -> Result<()> {
        let url = self.base_url.join("ping").context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach InfluxDB at {}", self.config.host))?;

        if !response.status().is_success() {
            anyhow::bail!("InfluxDB ping failed with status {}", response.status());
        }
        Ok(())
    }

    fn series_url(&self) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("db/{}/series", self.config.database))
            .context("Invalid database name")?;
        url.query_pairs_mut()
            .append_pair("u", &self.config.username)
            .append_pair("p", &self.config.password)
            .append_pair("time_precision", "ms");
        Ok(url)
    }
}

#[async_trait]
impl BackendWriter for InfluxDbWriter {
    async fn write(&self, points: Vec<OutputPoint>) -> Result<()> {
        let body: Vec<Series<'_>> = points.iter().map(Series::from).collect();

        let response = self
            .client
            .post(self.series_url()?)
            .json(&body)
            .send()
            .await
            .context("Failed to send series to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB write error ({}): {}", status, text);
        }

        debug!(series = body.len(), "Wrote series to InfluxDB");
        Ok(())
    }
}

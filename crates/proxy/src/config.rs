//! Proxy configuration
//!
//! Sources are layered lowest to highest: built-in defaults, an optional
//! config file, `PROXY_*` environment variables, then command-line flags.

use anyhow::{Context, Result};
use clap::Parser;
use proxy_lib::backend::InfluxDbConfig;
use proxy_lib::ingest::{BatchConfig, PipelineConfig};
use proxy_lib::names::RefresherConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line flags
#[derive(Debug, Parser)]
#[command(name = "collectd-proxy", version, about = "Forward collectd metrics to InfluxDB")]
pub struct Cli {
    /// Config file (toml, yaml or json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// UDP port to receive collectd packets on
    #[arg(long)]
    pub proxyport: Option<u16>,

    /// types.db file; repeat to load several
    #[arg(long)]
    pub typesdb: Vec<String>,

    /// host:port of the InfluxDB HTTP API
    #[arg(long)]
    pub influxdb: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub database: Option<String>,

    /// Convert counter and derive values to per-second rates
    #[arg(long)]
    pub normalize: Option<bool>,

    /// Connect to InfluxDB over https
    #[arg(long)]
    pub https: bool,

    /// Docker endpoint used to resolve container ids to names
    #[arg(long)]
    pub docker: Option<String>,

    /// Log every forwarded point
    #[arg(long, short)]
    pub verbose: bool,
}

/// Proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,

    #[serde(default = "default_typesdb")]
    pub typesdb: Vec<String>,

    #[serde(default = "default_influxdb")]
    pub influxdb: String,

    #[serde(default = "default_credential")]
    pub username: String,

    #[serde(default = "default_credential")]
    pub password: String,

    #[serde(default)]
    pub database: String,

    #[serde(default = "default_true")]
    pub normalize: bool,

    #[serde(default)]
    pub https: bool,

    #[serde(default)]
    pub docker: Option<String>,

    #[serde(default)]
    pub verbose: bool,

    /// Port for the health and metrics server
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_batch_max_points")]
    pub batch_max_points: usize,

    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_docker_refresh_secs")]
    pub docker_refresh_secs: u64,

    /// Forget rate-cache series idle for this long; unset keeps them forever
    #[serde(default)]
    pub series_ttl_secs: Option<u64>,
}

fn default_proxy_port() -> u16 {
    8096
}

fn default_typesdb() -> Vec<String> {
    vec!["types.db".to_string()]
}

fn default_influxdb() -> String {
    "localhost:8086".to_string()
}

fn default_credential() -> String {
    "root".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    8097
}

fn default_batch_max_points() -> usize {
    50
}

fn default_batch_interval_ms() -> u64 {
    1000
}

fn default_queue_size() -> usize {
    100
}

fn default_docker_refresh_secs() -> u64 {
    60
}

impl ProxyConfig {
    /// Load configuration from all sources
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let builder = builder
            .add_source(
                config::Environment::with_prefix("PROXY")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("typesdb"),
            )
            .set_override_option("proxy_port", cli.proxyport.map(i64::from))?
            .set_override_option(
                "typesdb",
                (!cli.typesdb.is_empty()).then(|| cli.typesdb.clone()),
            )?
            .set_override_option("influxdb", cli.influxdb.clone())?
            .set_override_option("username", cli.username.clone())?
            .set_override_option("password", cli.password.clone())?
            .set_override_option("database", cli.database.clone())?
            .set_override_option("normalize", cli.normalize)?
            .set_override_option("https", cli.https.then_some(true))?
            .set_override_option("docker", cli.docker.clone())?
            .set_override_option("verbose", cli.verbose.then_some(true))?;

        let config: ProxyConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            anyhow::bail!("An InfluxDB database name is required (--database)");
        }
        if self.typesdb.is_empty() {
            anyhow::bail!("At least one types.db file is required (--typesdb)");
        }
        if self.batch_max_points == 0 {
            anyhow::bail!("batch_max_points must be at least 1");
        }
        if self.queue_size == 0 {
            anyhow::bail!("queue_size must be at least 1");
        }
        if self.docker_refresh_secs == 0 {
            anyhow::bail!("docker_refresh_secs must be at least 1");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.proxy_port)
    }

    pub fn influxdb_config(&self) -> InfluxDbConfig {
        InfluxDbConfig {
            host: self.influxdb.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            https: self.https,
            ..Default::default()
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_points: self.batch_max_points,
            flush_interval: Duration::from_millis(self.batch_interval_ms),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            series_ttl: self.series_ttl_secs.map(Duration::from_secs),
            ..Default::default()
        }
    }

    pub fn refresher_config(&self) -> RefresherConfig {
        RefresherConfig {
            refresh_interval: Duration::from_secs(self.docker_refresh_secs),
        }
    }
}

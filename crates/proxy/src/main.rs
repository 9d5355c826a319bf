//! collectd proxy
//!
//! Receives collectd network packets over UDP, converts them into
//! InfluxDB series (optionally as per-second rates) and writes them in
//! batches to an InfluxDB 0.8 server.

use anyhow::{Context, Result};
use clap::Parser;
use proxy_lib::{
    backend::InfluxDbWriter,
    collectd::CollectdListener,
    health::{components, HealthRegistry},
    ingest::{BatchScheduler, Pipeline, RateNormalizer, SampleTransformer},
    names::{DockerNameSource, NameIndex, NameIndexRefresher},
    observability::{ProxyMetrics, StructuredLogger},
    types_db::TypesDb,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const PROXY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let config = config::ProxyConfig::load(&cli)?;

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "collectd-proxy".to_string());
    let logger = StructuredLogger::new(instance);

    let health_registry = HealthRegistry::new();
    health_registry.register(components::LISTENER).await;
    health_registry.register(components::PIPELINE).await;
    health_registry.register(components::BACKEND).await;

    let metrics = ProxyMetrics::new();

    let types = TypesDb::load(config.typesdb.as_slice()).context("Failed to load types.db")?;
    let known_types = types.len();
    info!(files = ?config.typesdb, types = known_types, "Loaded types.db");

    let writer = InfluxDbWriter::new(config.influxdb_config())?;
    let backend = writer.base_url().to_string();
    let handshake = writer.ping().await;
    logger.log_backend_handshake(&backend, handshake.is_ok());
    handshake?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let names = NameIndex::new();
    logger.log_name_source(config.docker.as_deref());
    if let Some(endpoint) = &config.docker {
        let source = DockerNameSource::new(endpoint)?;
        health_registry.register(components::NAME_INDEX).await;

        let refresher =
            NameIndexRefresher::new(Arc::new(source), names.clone(), config.refresher_config())
                .with_health(health_registry.clone())
                .with_metrics(metrics.clone());
        tokio::spawn(refresher.run(shutdown_tx.subscribe()));
    }

    let transformer = SampleTransformer::new(
        Arc::new(types),
        names,
        RateNormalizer::new(config.normalize),
    )
    .verbose(config.verbose);

    let scheduler = BatchScheduler::new(Arc::new(writer), config.batch_config())
        .with_health(health_registry.clone())
        .with_metrics(metrics.clone());

    let pipeline = Pipeline::new(transformer, scheduler, config.pipeline_config())
        .with_metrics(metrics.clone());

    let (samples_tx, samples_rx) = mpsc::channel(config.queue_size);
    let listener = CollectdListener::bind(&config.listen_addr(), samples_tx)
        .await?
        .with_metrics(metrics.clone());

    let pipeline_health = health_registry.clone();
    let pipeline_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        pipeline.run(samples_rx, pipeline_shutdown).await;
        pipeline_health
            .set_unhealthy(components::PIPELINE, "Pipeline stopped")
            .await;
    });

    let listener_health = health_registry.clone();
    let listener_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        listener.run(listener_shutdown).await;
        listener_health
            .set_unhealthy(components::LISTENER, "Listener stopped")
            .await;
    });

    let api_addr = format!("0.0.0.0:{}", config.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind API server to {}", api_addr))?;
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let mut api_handle = tokio::spawn(api::serve(
        api_listener,
        app_state,
        shutdown_tx.subscribe(),
    ));

    health_registry.set_ready(true).await;
    logger.log_startup(PROXY_VERSION, &config.listen_addr(), &backend, known_types);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");

            // Pending points and in-flight writes are not drained
            let _ = shutdown_tx.send(());
            api_handle.await.context("API server task failed")??;
        }
        served = &mut api_handle => {
            let _ = shutdown_tx.send(());
            served.context("API server task failed")??;
            logger.log_shutdown("API server stopped");
        }
    }

    Ok(())
}

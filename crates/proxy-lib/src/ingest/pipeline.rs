//! Ingestion loop
//!
//! Consumes decoded samples one at a time, converts them to points and feeds
//! the batch scheduler. Being the only consumer keeps the rate cache free of
//! locking.

use super::batch::BatchScheduler;
use super::transform::SampleTransformer;
use crate::models::Sample;
use crate::observability::ProxyMetrics;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the ingestion loop
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Evict rate cache series not seen for this long (default: never)
    pub series_ttl: Option<Duration>,
    /// How often the eviction sweep runs when a TTL is set
    pub sweep_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            series_ttl: None,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Single-consumer sample pipeline
pub struct Pipeline {
    transformer: SampleTransformer,
    scheduler: BatchScheduler,
    config: PipelineConfig,
    metrics: Option<ProxyMetrics>,
}

impl Pipeline {
    pub fn new(
        transformer: SampleTransformer,
        scheduler: BatchScheduler,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transformer,
            scheduler,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ProxyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn transformer(&self) -> &SampleTransformer {
        &self.transformer
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    /// Process one sample end to end
    pub fn process(&mut self, sample: &Sample) {
        let before = self.metrics.as_ref().map(|_| self.transformer.stats().clone());
        let points = self.transformer.transform(sample);

        // Offer even when empty so an elapsed interval still flushes
        self.scheduler.offer(points);

        if let (Some(metrics), Some(before)) = (&self.metrics, before) {
            metrics.add_transform_outcomes(&self.transformer.stats().since(&before));
            metrics.set_rate_cache_series(self.transformer.normalizer().len() as i64);
        }
    }

    /// Drop stale series from the rate cache if a TTL is configured
    pub fn sweep(&mut self, now_ms: i64) -> usize {
        let Some(ttl) = self.config.series_ttl else {
            return 0;
        };

        let cutoff = now_ms - ttl.as_millis() as i64;
        let evicted = self.transformer.normalizer_mut().evict_older_than(cutoff);
        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = self.transformer.normalizer().len(),
                "Evicted idle series from rate cache"
            );
        }
        evicted
    }

    /// Run until the channel closes or shutdown is signalled
    ///
    /// Pending points and in-flight writes are abandoned on shutdown.
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<Sample>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting ingestion pipeline");

        let mut sweeper = interval(self.config.sweep_interval);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                sample = samples.recv() => {
                    match sample {
                        Some(sample) => self.process(&sample),
                        None => {
                            info!("Sample channel closed, stopping pipeline");
                            break;
                        }
                    }
                }
                _ = sweeper.tick(), if self.config.series_ttl.is_some() => {
                    self.sweep(chrono::Utc::now().timestamp_millis());
                }
                _ = shutdown.recv() => {
                    info!(
                        pending = self.scheduler.pending(),
                        in_flight = self.scheduler.in_flight(),
                        "Shutting down ingestion pipeline"
                    );
                    break;
                }
            }
        }
    }
}

//! Point batching with count and interval triggers
//!
//! Points accumulate until either the configured count is reached or the
//! flush interval has elapsed since the last flush. Each flush is handed to
//! the backend on a detached task so backend latency never blocks ingestion.
//! The condition is only evaluated when points are offered; there is no
//! standalone timer.

use crate::health::{components, HealthRegistry};
use crate::models::OutputPoint;
use crate::observability::ProxyMetrics;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

/// Default number of points that triggers a flush
pub const DEFAULT_MAX_POINTS: usize = 50;

/// Default time between flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Storage backend that accepts batches of points
#[async_trait]
pub trait BackendWriter: Send + Sync {
    async fn write(&self, points: Vec<OutputPoint>) -> Result<()>;
}

/// Configuration for the batch scheduler
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush once this many points are pending
    pub max_points: usize,
    /// Flush once this much time has passed since the window started
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Which condition caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Count,
    Interval,
}

/// Summary of a dispatched flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flush {
    pub points: usize,
    pub trigger: FlushTrigger,
}

/// Accumulates points and dispatches them to the backend
pub struct BatchScheduler {
    writer: Arc<dyn BackendWriter>,
    config: BatchConfig,
    pending: Vec<OutputPoint>,
    window_start: Instant,
    in_flight: Arc<AtomicUsize>,
    health: Option<HealthRegistry>,
    metrics: Option<ProxyMetrics>,
}

impl BatchScheduler {
    pub fn new(writer: Arc<dyn BackendWriter>, config: BatchConfig) -> Self {
        Self {
            writer,
            pending: Vec::with_capacity(config.max_points),
            config,
            window_start: Instant::now(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            health: None,
            metrics: None,
        }
    }

    /// Report write outcomes to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_metrics(mut self, metrics: ProxyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Points waiting for the next flush
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Writes dispatched but not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Append points and flush if either trigger fired
    pub fn offer(&mut self, points: Vec<OutputPoint>) -> Option<Flush> {
        self.pending.extend(points);

        let trigger = if self.pending.len() >= self.config.max_points {
            FlushTrigger::Count
        } else if self.window_start.elapsed() >= self.config.flush_interval {
            FlushTrigger::Interval
        } else {
            return None;
        };

        self.window_start = Instant::now();
        if self.pending.is_empty() {
            return None;
        }

        let batch = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.max_points),
        );
        let flush = Flush {
            points: batch.len(),
            trigger,
        };
        debug!(points = flush.points, trigger = ?trigger, "Flushing batch");
        self.dispatch(batch);

        Some(flush)
    }

    /// Hand a batch to the backend on a detached task
    fn dispatch(&self, batch: Vec<OutputPoint>) {
        let writer = Arc::clone(&self.writer);
        let in_flight = Arc::clone(&self.in_flight);
        let health = self.health.clone();
        let metrics = self.metrics.clone();

        let current = in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(metrics) = &metrics {
            metrics.set_batches_in_flight(current as i64);
        }

        tokio::spawn(async move {
            let count = batch.len();
            let start = Instant::now();

            match writer.write(batch).await {
                Ok(()) => {
                    debug!(
                        points = count,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Wrote batch"
                    );
                    if let Some(metrics) = &metrics {
                        metrics.observe_write_latency(start.elapsed().as_secs_f64());
                        metrics.inc_batches_written(count as u64);
                    }
                    if let Some(health) = &health {
                        health.set_healthy(components::BACKEND).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, points = count, "Failed to write batch, dropping it");
                    if let Some(metrics) = &metrics {
                        metrics.inc_write_errors(count as u64);
                    }
                    if let Some(health) = &health {
                        health
                            .set_degraded(components::BACKEND, e.to_string())
                            .await;
                    }
                }
            }

            let remaining = in_flight.fetch_sub(1, Ordering::Relaxed) - 1;
            if let Some(metrics) = &metrics {
                metrics.set_batches_in_flight(remaining as i64);
            }
        });
    }
}

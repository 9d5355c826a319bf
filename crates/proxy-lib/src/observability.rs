//! Observability infrastructure for the proxy
//!
//! Provides:
//! - Prometheus metrics (packet decoding, transform outcomes, backend writes)
//! - Structured logging of lifecycle events with tracing

use crate::ingest::TransformStats;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Backend write latency buckets (in seconds)
const WRITE_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProxyMetricsInner> = OnceLock::new();

struct ProxyMetricsInner {
    samples_received: IntCounter,
    decode_errors: IntCounter,
    samples_transformed: IntCounter,
    transform_slots: IntCounterVec,
    rate_cache_series: IntGauge,
    name_index_entries: IntGauge,
    batches_written: IntCounter,
    points_written: IntCounter,
    points_dropped: IntCounter,
    batches_in_flight: IntGauge,
    write_latency_seconds: Histogram,
}

impl ProxyMetricsInner {
    fn new() -> Self {
        Self {
            samples_received: register_int_counter!(
                "collectd_proxy_samples_received_total",
                "Samples decoded from collectd packets"
            )
            .expect("Failed to register samples_received"),

            decode_errors: register_int_counter!(
                "collectd_proxy_decode_errors_total",
                "Datagrams that could not be decoded"
            )
            .expect("Failed to register decode_errors"),

            samples_transformed: register_int_counter!(
                "collectd_proxy_samples_transformed_total",
                "Samples handed to the transformer"
            )
            .expect("Failed to register samples_transformed"),

            transform_slots: register_int_counter_vec!(
                "collectd_proxy_transform_slots_total",
                "Value slots seen by the transformer, by outcome",
                &["outcome"]
            )
            .expect("Failed to register transform_slots"),

            rate_cache_series: register_int_gauge!(
                "collectd_proxy_rate_cache_series",
                "Series tracked by the rate normalizer"
            )
            .expect("Failed to register rate_cache_series"),

            name_index_entries: register_int_gauge!(
                "collectd_proxy_name_index_entries",
                "Container id to name mappings currently loaded"
            )
            .expect("Failed to register name_index_entries"),

            batches_written: register_int_counter!(
                "collectd_proxy_batches_written_total",
                "Batches accepted by the backend"
            )
            .expect("Failed to register batches_written"),

            points_written: register_int_counter!(
                "collectd_proxy_points_written_total",
                "Points accepted by the backend"
            )
            .expect("Failed to register points_written"),

            points_dropped: register_int_counter!(
                "collectd_proxy_points_dropped_total",
                "Points lost to failed backend writes"
            )
            .expect("Failed to register points_dropped"),

            batches_in_flight: register_int_gauge!(
                "collectd_proxy_batches_in_flight",
                "Backend writes currently outstanding"
            )
            .expect("Failed to register batches_in_flight"),

            write_latency_seconds: register_histogram!(
                "collectd_proxy_write_latency_seconds",
                "Time spent writing one batch to the backend",
                WRITE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register write_latency_seconds"),
        }
    }
}

/// Proxy metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ProxyMetrics {
    inner: &'static ProxyMetricsInner,
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyMetrics {
    /// Create a new metrics handle (registers global metrics if needed)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(ProxyMetricsInner::new),
        }
    }

    pub fn inc_samples_received(&self) {
        self.inner.samples_received.inc();
    }

    pub fn inc_decode_errors(&self) {
        self.inner.decode_errors.inc();
    }

    /// Count the outcomes of one or more transformations
    pub fn add_transform_outcomes(&self, delta: &TransformStats) {
        self.inner.samples_transformed.inc_by(delta.samples);

        let slots = &self.inner.transform_slots;
        for (outcome, count) in [
            ("emitted", delta.emitted),
            ("unknown_type", delta.unknown_type),
            ("not_ready", delta.not_ready),
            ("label_mismatch", delta.label_mismatch),
        ] {
            slots.with_label_values(&[outcome]).inc_by(count);
        }
    }

    pub fn set_rate_cache_series(&self, count: i64) {
        self.inner.rate_cache_series.set(count);
    }

    pub fn set_name_index_entries(&self, count: i64) {
        self.inner.name_index_entries.set(count);
    }

    /// Record one successful batch of `points` points
    pub fn inc_batches_written(&self, points: u64) {
        self.inner.batches_written.inc();
        self.inner.points_written.inc_by(points);
    }

    /// Record a failed batch of `points` points
    pub fn inc_write_errors(&self, points: u64) {
        self.inner.points_dropped.inc_by(points);
    }

    pub fn set_batches_in_flight(&self, count: i64) {
        self.inner.batches_in_flight.set(count);
    }

    pub fn observe_write_latency(&self, duration_secs: f64) {
        self.inner.write_latency_seconds.observe(duration_secs);
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for proxy lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, listen_addr: &str, backend: &str, types: usize) {
        info!(
            event = "proxy_started",
            instance = %self.instance,
            proxy_version = %version,
            listen_addr = %listen_addr,
            backend = %backend,
            known_types = types,
            "collectd proxy started"
        );
    }

    pub fn log_backend_handshake(&self, backend: &str, success: bool) {
        if success {
            info!(
                event = "backend_handshake",
                instance = %self.instance,
                backend = %backend,
                "Backend answered ping"
            );
        } else {
            warn!(
                event = "backend_handshake_failed",
                instance = %self.instance,
                backend = %backend,
                "Backend did not answer ping"
            );
        }
    }

    pub fn log_name_source(&self, endpoint: Option<&str>) {
        match endpoint {
            Some(endpoint) => info!(
                event = "name_source_configured",
                instance = %self.instance,
                endpoint = %endpoint,
                "Resolving container ids through Docker"
            ),
            None => info!(
                event = "name_source_configured",
                instance = %self.instance,
                "No Docker endpoint, hosts are forwarded unchanged"
            ),
        }
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "proxy_shutdown",
            instance = %self.instance,
            reason = %reason,
            "collectd proxy shutting down"
        );
    }
}

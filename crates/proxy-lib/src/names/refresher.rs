//! Periodic name index refresh

use super::{NameIndex, NameSource};
use crate::health::{components, HealthRegistry};
use crate::observability::ProxyMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the name index refresher
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Time between refreshes (default: 60 seconds)
    pub refresh_interval: Duration,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Rebuilds the name index from a source on a fixed interval
pub struct NameIndexRefresher {
    source: Arc<dyn NameSource>,
    index: NameIndex,
    config: RefresherConfig,
    health: Option<HealthRegistry>,
    metrics: Option<ProxyMetrics>,
}

impl NameIndexRefresher {
    pub fn new(source: Arc<dyn NameSource>, index: NameIndex, config: RefresherConfig) -> Self {
        Self {
            source,
            index,
            config,
            health: None,
            metrics: None,
        }
    }

    /// Report refresh outcomes to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_metrics(mut self, metrics: ProxyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one refresh cycle; the previous mapping stays in effect on failure
    pub async fn refresh_once(&self) -> bool {
        match self.source.fetch().await {
            Ok(names) => {
                let count = names.len();
                self.index.replace(names);
                debug!(entries = count, "Name index refreshed");

                if let Some(metrics) = &self.metrics {
                    metrics.set_name_index_entries(count as i64);
                }
                if let Some(health) = &self.health {
                    health.set_healthy(components::NAME_INDEX).await;
                }
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    entries = self.index.len(),
                    "Failed to refresh name index, keeping previous mapping"
                );
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::NAME_INDEX, e.to_string())
                        .await;
                }
                false
            }
        }
    }

    /// Refresh immediately, then on every tick until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.refresh_interval.as_secs(),
            "Starting name index refresher"
        );

        let mut ticker = interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down name index refresher");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that succeeds once and fails afterwards
    struct FlakySource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NameSource for FlakySource {
        async fn fetch(&self) -> Result<HashMap<String, String>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(HashMap::from([(
                    "abc123".to_string(),
                    "frontend-1".to_string(),
                )]))
            } else {
                anyhow::bail!("docker daemon unavailable")
            }
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_mapping() {
        let index = NameIndex::new();
        let health = HealthRegistry::new();
        health.register(components::NAME_INDEX).await;

        let refresher = NameIndexRefresher::new(
            Arc::new(FlakySource {
                calls: AtomicUsize::new(0),
            }),
            index.clone(),
            RefresherConfig::default(),
        )
        .with_health(health.clone());

        assert!(refresher.refresh_once().await);
        assert_eq!(index.resolve("abc123"), "frontend-1");

        assert!(!refresher.refresh_once().await);
        assert_eq!(index.resolve("abc123"), "frontend-1");

        let status = health.health().await;
        assert_eq!(
            status.components[components::NAME_INDEX].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_refreshes_until_shutdown() {
        let index = NameIndex::new();
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let refresher = NameIndexRefresher::new(
            source.clone(),
            index.clone(),
            RefresherConfig {
                refresh_interval: Duration::from_secs(10),
            },
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(refresher.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // Immediate tick plus two interval ticks
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.resolve("abc123"), "frontend-1");
    }
}

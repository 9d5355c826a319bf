//! Sample to point conversion
//!
//! Expands one decoded collectd sample into one output point per value slot,
//! naming each series from the plugin and type identity and rewriting the
//! host label through the name index.

use super::normalize::{Normalized, RateNormalizer};
use crate::models::{OutputPoint, Sample};
use crate::names::NameIndex;
use crate::types_db::TypesDb;
use std::sync::Arc;
use tracing::{debug, warn};

/// Running totals of transformation outcomes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransformStats {
    pub samples: u64,
    pub emitted: u64,
    /// Slots dropped because the type is unknown and has no type instance
    pub unknown_type: u64,
    /// Slots held back while a cumulative series gets its first baseline
    pub not_ready: u64,
    /// Slots beyond the labels declared for their type
    pub label_mismatch: u64,
}

impl TransformStats {
    /// Outcomes recorded after `earlier` was taken
    pub fn since(&self, earlier: &TransformStats) -> TransformStats {
        TransformStats {
            samples: self.samples.saturating_sub(earlier.samples),
            emitted: self.emitted.saturating_sub(earlier.emitted),
            unknown_type: self.unknown_type.saturating_sub(earlier.unknown_type),
            not_ready: self.not_ready.saturating_sub(earlier.not_ready),
            label_mismatch: self.label_mismatch.saturating_sub(earlier.label_mismatch),
        }
    }
}

/// Converts samples into output points
pub struct SampleTransformer {
    types: Arc<TypesDb>,
    names: NameIndex,
    normalizer: RateNormalizer,
    verbose: bool,
    stats: TransformStats,
}

impl SampleTransformer {
    pub fn new(types: Arc<TypesDb>, names: NameIndex, normalizer: RateNormalizer) -> Self {
        Self {
            types,
            names,
            normalizer,
            verbose: false,
            stats: TransformStats::default(),
        }
    }

    /// Log every accepted point
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn stats(&self) -> &TransformStats {
        &self.stats
    }

    pub fn normalizer(&self) -> &RateNormalizer {
        &self.normalizer
    }

    pub fn normalizer_mut(&mut self) -> &mut RateNormalizer {
        &mut self.normalizer
    }

    /// Expand a sample into zero or more points
    pub fn transform(&mut self, sample: &Sample) -> Vec<OutputPoint> {
        self.stats.samples += 1;

        let labels = self.types.labels_for(&sample.type_name);
        let mut points = Vec::with_capacity(sample.values.len());

        for (i, value) in sample.values.iter().enumerate() {
            let type_label = match (&sample.type_instance, labels) {
                (Some(instance), _) => format!("{}-{}", sample.type_name, instance),
                (None, Some(labels)) => match labels.get(i) {
                    Some(label) => format!("{}-{}", sample.type_name, label),
                    None => {
                        warn!(
                            plugin = %sample.plugin,
                            type_name = %sample.type_name,
                            slot = i,
                            declared = labels.len(),
                            "Value slot has no label in types.db"
                        );
                        self.stats.label_mismatch += 1;
                        continue;
                    }
                },
                (None, None) => {
                    warn!(
                        plugin = %sample.plugin,
                        type_name = %sample.type_name,
                        "Unknown type without type instance"
                    );
                    self.stats.unknown_type += 1;
                    continue;
                }
            };

            // Dots separate path segments in series names
            let host = self.names.resolve(&sample.host.replace('.', "_"));

            let plugin_label = match &sample.plugin_instance {
                Some(instance) => format!("{}-{}", sample.plugin, instance),
                None => sample.plugin.clone(),
            };

            let name = format!("{}.{}", plugin_label, type_label);
            let cache_key = format!("{}.{}", host, name);

            let value = match self.normalizer.apply(&cache_key, sample.time_ms, value) {
                Normalized::Ready(v) => v,
                Normalized::NotReady => {
                    self.stats.not_ready += 1;
                    continue;
                }
            };

            let point = OutputPoint {
                name,
                timestamp_ms: sample.time_ms,
                value,
                host,
            };
            if self.verbose {
                debug!(
                    series = %point.name,
                    host = %point.host,
                    timestamp_ms = point.timestamp_ms,
                    value = point.value,
                    "Ready to send point"
                );
            }

            self.stats.emitted += 1;
            points.push(point);
        }

        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use std::collections::HashMap;

    fn types() -> Arc<TypesDb> {
        Arc::new(TypesDb::from_entries([
            ("cpu", vec!["value"]),
            ("if_octets", vec!["rx", "tx"]),
            ("load", vec!["shortterm", "midterm", "longterm"]),
        ]))
    }

    fn sample(host: &str, type_name: &str, values: Vec<Value>, time_ms: i64) -> Sample {
        Sample {
            host: host.to_string(),
            plugin: "interface".to_string(),
            plugin_instance: Some("eth0".to_string()),
            type_name: type_name.to_string(),
            type_instance: None,
            values,
            time_ms,
        }
    }

    fn transformer(names: NameIndex) -> SampleTransformer {
        SampleTransformer::new(types(), names, RateNormalizer::new(true))
    }

    #[test]
    fn test_stats_since_reports_one_sample() {
        let mut transformer = transformer(NameIndex::new());
        let first = vec![Value::Derive(1), Value::Derive(2)];
        transformer.transform(&sample("h", "if_octets", first, 0));
        let before = transformer.stats().clone();

        let second = vec![Value::Derive(3), Value::Derive(4)];
        transformer.transform(&sample("h", "if_octets", second, 1_000));
        let delta = transformer.stats().since(&before);

        assert_eq!(
            delta,
            TransformStats {
                samples: 1,
                emitted: 2,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_gauge_sample_expands_per_label() {
        let mut transformer = transformer(NameIndex::new());
        let mut load = sample(
            "web.01",
            "load",
            vec![Value::Gauge(0.5), Value::Gauge(0.75), Value::Gauge(1.0)],
            1_000,
        );
        load.plugin = "load".to_string();
        load.plugin_instance = None;

        let points = transformer.transform(&load);

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].name, "load.load-shortterm");
        assert_eq!(points[1].name, "load.load-midterm");
        assert_eq!(points[2].name, "load.load-longterm");
        assert_eq!(points[2].value, 1.0);
        assert!(points.iter().all(|p| p.host == "web_01"));
        assert!(points.iter().all(|p| p.timestamp_ms == 1_000));
    }

    #[test]
    fn test_gauge_value_is_verbatim_regardless_of_cache() {
        let mut transformer = transformer(NameIndex::new());
        let mut s = sample("h", "cpu", vec![Value::Gauge(12.5)], 1_000);

        assert_eq!(transformer.transform(&s)[0].value, 12.5);
        s.values = vec![Value::Gauge(3.0)];
        s.time_ms = 2_000;
        assert_eq!(transformer.transform(&s)[0].value, 3.0);
        assert!(transformer.normalizer().is_empty());
    }

    #[test]
    fn test_counter_series_suppresses_first_then_emits_rate() {
        let mut transformer = transformer(NameIndex::new());

        let first = sample(
            "h",
            "if_octets",
            vec![Value::Derive(1_000), Value::Derive(2_000)],
            10_000,
        );
        assert!(transformer.transform(&first).is_empty());
        assert_eq!(transformer.stats().not_ready, 2);

        let second = sample(
            "h",
            "if_octets",
            vec![Value::Derive(1_500), Value::Derive(2_100)],
            15_000,
        );
        let points = transformer.transform(&second);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, "interface-eth0.if_octets-rx");
        assert_eq!(points[0].value, 100.0);
        assert_eq!(points[1].name, "interface-eth0.if_octets-tx");
        assert_eq!(points[1].value, 20.0);
        assert!(transformer
            .normalizer()
            .get("h.interface-eth0.if_octets-rx")
            .is_some());
    }

    #[test]
    fn test_unknown_type_without_instance_is_dropped() {
        let mut transformer = transformer(NameIndex::new());

        let points = transformer.transform(&sample("h", "mystery", vec![Value::Gauge(1.0)], 0));

        assert!(points.is_empty());
        assert_eq!(transformer.stats().unknown_type, 1);
        assert_eq!(transformer.stats().emitted, 0);
    }

    #[test]
    fn test_unknown_type_with_instance_is_named_from_instance() {
        let mut transformer = transformer(NameIndex::new());
        let mut s = sample("h", "mystery", vec![Value::Gauge(1.0)], 0);
        s.type_instance = Some("custom".to_string());

        let points = transformer.transform(&s);

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "interface-eth0.mystery-custom");
    }

    #[test]
    fn test_type_instance_takes_precedence_over_labels() {
        let mut transformer = transformer(NameIndex::new());
        let mut s = sample("h", "cpu", vec![Value::Gauge(1.0)], 0);
        s.plugin = "cpu".to_string();
        s.plugin_instance = Some("0".to_string());
        s.type_instance = Some("user".to_string());

        let points = transformer.transform(&s);
        assert_eq!(points[0].name, "cpu-0.cpu-user");
    }

    #[test]
    fn test_host_substitution() {
        let mut plain = transformer(NameIndex::new());
        let points = plain.transform(&sample("web.01", "cpu", vec![Value::Gauge(1.0)], 0));
        assert_eq!(points[0].host, "web_01");

        let names = NameIndex::with_names(HashMap::from([(
            "web_01".to_string(),
            "frontend-1".to_string(),
        )]));
        let mut mapped = transformer(names);
        let points = mapped.transform(&sample("web.01", "cpu", vec![Value::Gauge(1.0)], 0));
        assert_eq!(points[0].host, "frontend-1");
    }

    #[test]
    fn test_extra_slots_without_labels_are_dropped() {
        let mut transformer = transformer(NameIndex::new());

        let points = transformer.transform(&sample(
            "h",
            "cpu",
            vec![Value::Gauge(1.0), Value::Gauge(2.0)],
            0,
        ));

        assert_eq!(points.len(), 1);
        assert_eq!(transformer.stats().label_mismatch, 1);
    }
}

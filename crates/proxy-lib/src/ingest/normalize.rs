//! Rate normalization for cumulative values
//!
//! Counter and derive values only carry meaning as a difference over time.
//! The normalizer remembers the last raw observation of every series and
//! turns each new one into a per-second rate against it.

use crate::models::{CacheEntry, Value};
use std::collections::HashMap;

/// Outcome of normalizing one value slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalized {
    /// A value is available for emission
    Ready(f64),
    /// First sighting of the series; a baseline was recorded
    NotReady,
}

/// Per-series last-seen cache
///
/// Only touched by the single ingestion path, so no locking.
#[derive(Debug)]
pub struct RateNormalizer {
    cache: HashMap<String, CacheEntry>,
    enabled: bool,
}

impl Default for RateNormalizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RateNormalizer {
    pub fn new(enabled: bool) -> Self {
        Self {
            cache: HashMap::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Normalize a raw value, passing non-cumulative kinds through untouched
    pub fn apply(&mut self, key: &str, time_ms: i64, value: &Value) -> Normalized {
        if !self.enabled || !value.kind().is_cumulative() {
            return Normalized::Ready(value.as_f64());
        }
        self.normalize(key, time_ms, value.as_f64())
    }

    /// Difference a cumulative value against the previous one for `key`
    ///
    /// The cache entry is overwritten on every call, including the first
    /// sighting and when time did not move forward.
    pub fn normalize(&mut self, key: &str, time_ms: i64, raw: f64) -> Normalized {
        let current = CacheEntry {
            timestamp_ms: time_ms,
            value: raw,
        };

        let previous = match self.cache.get_mut(key) {
            Some(entry) => std::mem::replace(entry, current),
            None => {
                self.cache.insert(key.to_string(), current);
                return Normalized::NotReady;
            }
        };

        if previous.value.is_nan() {
            return Normalized::NotReady;
        }

        let elapsed_ms = time_ms.saturating_sub(previous.timestamp_ms);
        if elapsed_ms > 0 {
            Normalized::Ready((raw - previous.value) / (elapsed_ms as f64 / 1000.0))
        } else {
            // Clock stalled or went backwards
            Normalized::Ready(raw - previous.value)
        }
    }

    /// Last cached observation for a series
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.cache.get(key).copied()
    }

    /// Number of tracked series
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop series last observed before `cutoff_ms`, returning how many went
    pub fn evict_older_than(&mut self, cutoff_ms: i64) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.timestamp_ms >= cutoff_ms);
        before - self.cache.len()
    }
}

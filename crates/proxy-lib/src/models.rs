//! Core data models for the collectd proxy

use serde::{Deserialize, Serialize};

/// Kind tag carried by every collectd value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Gauge,
    Counter,
    Derive,
    Absolute,
}

impl ValueKind {
    /// Counter and derive values accumulate and must be differenced over time
    pub fn is_cumulative(&self) -> bool {
        matches!(self, ValueKind::Counter | ValueKind::Derive)
    }
}

/// A raw value slot as decoded from the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Gauge(f64),
    Counter(u64),
    Derive(i64),
    Absolute(u64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Gauge(_) => ValueKind::Gauge,
            Value::Counter(_) => ValueKind::Counter,
            Value::Derive(_) => ValueKind::Derive,
            Value::Absolute(_) => ValueKind::Absolute,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Gauge(v) => v,
            Value::Counter(v) => v as f64,
            Value::Derive(v) => v as f64,
            Value::Absolute(v) => v as f64,
        }
    }
}

/// One decoded metric report from a collectd agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub host: String,
    pub plugin: String,
    pub plugin_instance: Option<String>,
    pub type_name: String,
    pub type_instance: Option<String>,
    pub values: Vec<Value>,
    /// Milliseconds since the Unix epoch
    pub time_ms: i64,
}

/// Last observation of a cumulative series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// A converted point ready for the storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPoint {
    /// Series name, `plugin[-instance].type[-instance]`
    pub name: String,
    pub timestamp_ms: i64,
    pub value: f64,
    pub host: String,
}

//! Core library for the collectd to InfluxDB proxy
//!
//! This crate provides:
//! - Decoding of the collectd network protocol
//! - types.db parsing and container name resolution
//! - Rate normalization, point transformation and batched backend writes
//! - Health checks and observability

pub mod backend;
pub mod collectd;
pub mod health;
pub mod ingest;
pub mod models;
pub mod names;
pub mod observability;
pub mod types_db;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ProxyMetrics, StructuredLogger};
pub use types_db::{TypesDb, TypesDbError};

//! Time-series backends that accept point batches

mod influxdb;

pub use influxdb::{InfluxDbConfig, InfluxDbWriter};

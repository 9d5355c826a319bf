//! Sample normalization and batching
//!
//! This module provides:
//! - Rate normalization for counter and derive values
//! - Conversion of collectd samples into named output points
//! - Count/interval batching with fire-and-forget backend writes
//! - The single-consumer ingestion loop tying them together

mod batch;
mod normalize;
mod pipeline;
mod transform;


pub use batch::{
    BackendWriter, BatchConfig, BatchScheduler, Flush, FlushTrigger, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_MAX_POINTS,
};
pub use normalize::{Normalized, RateNormalizer};
pub use pipeline::{Pipeline, PipelineConfig};
pub use transform::{SampleTransformer, TransformStats};

//! collectd network protocol ingestion
//!
//! This module provides a decoder for the collectd binary protocol and a
//! UDP listener that feeds decoded samples into the ingestion pipeline.

mod listener;
mod protocol;


pub use listener::{CollectdListener, DEFAULT_QUEUE_SIZE};
pub use protocol::{decode_packet, DecodeError};

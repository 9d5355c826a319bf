//! Host name substitution
//!
//! This module provides:
//! - A name index mapping raw container ids to display names
//! - A background refresher that periodically rebuilds the index
//! - A Docker Engine API source for running container names

mod docker;
mod index;
mod refresher;

pub use docker::DockerNameSource;
pub use index::NameIndex;
pub use refresher::{NameIndexRefresher, RefresherConfig};

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Source of the full raw id -> display name mapping
#[async_trait]
pub trait NameSource: Send + Sync {
    /// Fetch a complete mapping; a partial result must be reported as an error
    async fn fetch(&self) -> Result<HashMap<String, String>>;
}

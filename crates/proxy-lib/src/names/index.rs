//! Snapshot-swapped name index

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Mapping from raw host/container id to a friendly display name
///
/// The whole map is replaced on every refresh. Readers load the current
/// snapshot without blocking the writer, so a lookup always sees one
/// complete mapping.
#[derive(Clone)]
pub struct NameIndex {
    names: Arc<ArcSwap<HashMap<String, String>>>,
}

impl Default for NameIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl NameIndex {
    pub fn new() -> Self {
        Self {
            names: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    pub fn with_names(names: HashMap<String, String>) -> Self {
        Self {
            names: Arc::new(ArcSwap::from_pointee(names)),
        }
    }

    /// Resolve a raw id, falling back to the input unchanged
    pub fn resolve(&self, raw: &str) -> String {
        self.names
            .load()
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    /// Install a new mapping, replacing the previous one wholesale
    pub fn replace(&self, names: HashMap<String, String>) {
        self.names.store(Arc::new(names));
    }

    pub fn len(&self) -> usize {
        self.names.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.load().is_empty()
    }
}

//! collectd type definitions
//!
//! Maps a collectd type name (e.g. `if_octets`) to the ordered labels of its
//! data sources (e.g. `rx`, `tx`). The table is loaded once from one or more
//! `types.db` files and never mutated afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading a types.db file
#[derive(Debug, Error)]
pub enum TypesDbError {
    #[error("failed to read types.db {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed types.db entry at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Immutable lookup table of type name -> value labels
#[derive(Debug, Clone, Default)]
pub struct TypesDb {
    types: HashMap<String, Vec<String>>,
}

impl TypesDb {
    /// Load and merge the given files; later files override earlier ones
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, TypesDbError> {
        let mut db = Self::default();

        for path in paths {
            let path = path.as_ref();
            let content = std::fs::read_to_string(path).map_err(|source| TypesDbError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let parsed = Self::parse(&content)?;
            debug!(path = %path.display(), types = parsed.len(), "Parsed types.db");
            db.types.extend(parsed.types);
        }

        info!(types = db.len(), "Loaded collectd type definitions");
        Ok(db)
    }

    /// Parse the textual types.db format
    pub fn parse(content: &str) -> Result<Self, TypesDbError> {
        let mut types = HashMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let (name, sources) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| TypesDbError::Malformed {
                    line: idx + 1,
                    reason: format!("type '{}' has no data sources", line),
                })?;

            let labels = sources
                .split(',')
                .map(|source| {
                    let label = source.trim().split(':').next().unwrap_or_default().trim();
                    if label.is_empty() {
                        Err(TypesDbError::Malformed {
                            line: idx + 1,
                            reason: format!("data source without a name in type '{}'", name),
                        })
                    } else {
                        Ok(label.to_string())
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;

            types.insert(name.to_string(), labels);
        }

        Ok(Self { types })
    }

    /// Build a table directly from entries
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<S>)>,
        S: Into<String>,
    {
        let types = entries
            .into_iter()
            .map(|(name, labels)| (name.into(), labels.into_iter().map(Into::into).collect()))
            .collect();
        Self { types }
    }

    /// Ordered value labels for a type, or `None` if the type is unknown
    pub fn labels_for(&self, type_name: &str) -> Option<&[String]> {
        self.types.get(type_name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

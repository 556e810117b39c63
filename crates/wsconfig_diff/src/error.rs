//! Error types for delta reconciliation.

use thiserror::Error;

/// Result type for reconciliation operations.
pub type DiffResult<T> = Result<T, DiffError>;

/// Errors that can occur while merging a delta into a cache.
///
/// Every variant is raised before the cache is touched, so a failed merge
/// always leaves the cache exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// The delta carried no keys in any of its updateable collections.
    #[error("delta response is empty: no keys in any updateable collection")]
    EmptyDelta,

    /// The delta references a collection the cache does not hold.
    #[error("collection {collection} is not present in the cache")]
    SchemaMismatch {
        /// Type name of the offending collection, without module paths.
        collection: String,
    },

    /// The delta marks an entity as unchanged but the cache cannot supply it.
    #[error("inconsistent delta for key {key} in {collection}: {reason}")]
    InconsistentDelta {
        /// Type name of the collection, without module paths.
        collection: String,
        /// Debug rendering of the entity key.
        key: String,
        /// Why the unchanged marker could not be resolved.
        reason: InconsistencyReason,
    },
}

/// Why an unchanged marker in a delta could not be resolved against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistencyReason {
    /// The key was never cached.
    MissingFromCache,
    /// The cache itself holds the unchanged marker for the key.
    UnchangedInCache,
}

impl std::fmt::Display for InconsistencyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InconsistencyReason::MissingFromCache => {
                write!(f, "value was not updated but is not present in cache")
            }
            InconsistencyReason::UnchangedInCache => {
                write!(f, "value was not updated but is unchanged in cache too")
            }
        }
    }
}

impl DiffError {
    pub(crate) fn schema_mismatch(collection: &str) -> Self {
        Self::SchemaMismatch {
            collection: short_type_name(collection),
        }
    }

    pub(crate) fn inconsistent(
        collection: &str,
        key: &impl std::fmt::Debug,
        reason: InconsistencyReason,
    ) -> Self {
        Self::InconsistentDelta {
            collection: short_type_name(collection),
            key: format!("{key:?}"),
            reason,
        }
    }
}

/// Drops module paths from a type name, keeping generic structure:
/// `a::KeyedList<alloc::string::String, b::Item>` becomes
/// `KeyedList<String, Item>`.
pub(crate) fn short_type_name(name: &str) -> String {
    fn last_segment(path: &str) -> &str {
        path.rsplit("::").next().unwrap_or(path)
    }

    let mut short = String::with_capacity(name.len());
    let mut path = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
        } else {
            short.push_str(last_segment(&path));
            path.clear();
            short.push(c);
        }
    }
    short.push_str(last_segment(&path));
    short
}

//! Entities that can take part in a diff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An entity carrying a last-modified timestamp.
pub trait UpdateableElement: Clone + Send + Sync + 'static {
    /// When the entity was last modified on the server.
    fn updated_at(&self) -> DateTime<Utc>;
}

/// An entry of an updateable collection inside a delta.
///
/// `Unchanged` is the server's "exists, but not modified since the watermark"
/// marker. It is distinct from the key being absent, which means the entity
/// no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEntry<T> {
    /// Present on the server, not modified since the requested watermark.
    Unchanged,
    /// Present on the server with this (new or modified) value.
    Updated(T),
}

impl<T> DeltaEntry<T> {
    /// Returns true for the unchanged marker.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, DeltaEntry::Unchanged)
    }

    /// Returns the value if the entry carries one.
    pub fn as_updated(&self) -> Option<&T> {
        match self {
            DeltaEntry::Updated(value) => Some(value),
            DeltaEntry::Unchanged => None,
        }
    }

    /// Consumes the entry, returning the value if it carries one.
    pub fn into_updated(self) -> Option<T> {
        match self {
            DeltaEntry::Updated(value) => Some(value),
            DeltaEntry::Unchanged => None,
        }
    }
}

impl<T> From<Option<T>> for DeltaEntry<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => DeltaEntry::Updated(value),
            None => DeltaEntry::Unchanged,
        }
    }
}

impl<T> From<DeltaEntry<T>> for Option<T> {
    fn from(entry: DeltaEntry<T>) -> Self {
        entry.into_updated()
    }
}

// On the wire the unchanged marker is a null value.
impl<T: Serialize> Serialize for DeltaEntry<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DeltaEntry::Unchanged => serializer.serialize_none(),
            DeltaEntry::Updated(value) => serializer.serialize_some(value),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for DeltaEntry<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(DeltaEntry::from)
    }
}

//! Collection capability contracts and ready-made implementations.

use crate::element::{DeltaEntry, UpdateableElement};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Boxed iterator over the entries of a collection.
pub type Entries<'a, K, V> = Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a>;

/// A keyed collection of updateable entities.
///
/// The key set of a complete delta is authoritative: keys missing from it are
/// removed from the cache when the collection changes.
pub trait UpdateableList: Send + Sync + 'static {
    /// Entity key.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;
    /// Entity type.
    type Element: UpdateableElement;

    /// Type tag used to pair a delta collection with its cache counterpart.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Number of keys, including unchanged ones.
    fn len(&self) -> usize;

    /// Returns true if the collection holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all entries. Order is unspecified; every call restarts.
    fn entries(&self) -> Entries<'_, Self::Key, DeltaEntry<Self::Element>>;

    /// Looks up a single entry.
    fn get(&self, key: &Self::Key) -> Option<&DeltaEntry<Self::Element>>;

    /// Inserts or replaces an entry.
    fn set(&mut self, key: Self::Key, entry: DeltaEntry<Self::Element>);

    /// Removes every entry.
    fn reset(&mut self);
}

/// A keyed collection without modification timestamps.
///
/// Entries are overwritten by key on receipt and never deleted implicitly.
pub trait NonUpdateableList: Send + Sync + 'static {
    /// Entry key.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;
    /// Entry value.
    type Value: Clone + Send + Sync + 'static;

    /// Type tag used to pair a delta collection with its cache counterpart.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Number of entries.
    fn len(&self) -> usize;

    /// Returns true if the collection holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all entries.
    fn entries(&self) -> Entries<'_, Self::Key, Self::Value>;

    /// Inserts or overwrites an entry.
    fn upsert(&mut self, key: Self::Key, value: Self::Value);

    /// Removes every entry.
    fn reset(&mut self);
}

/// Hash-map backed [`UpdateableList`].
///
/// Serializes as a plain map where unchanged entries are `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyedList<K: Eq + Hash, T> {
    entries: HashMap<K, DeltaEntry<T>>,
}

impl<K: Eq + Hash, T> KeyedList<K, T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns the value for `key` if present and not the unchanged marker.
    pub fn updated(&self, key: &K) -> Option<&T> {
        self.entries.get(key).and_then(DeltaEntry::as_updated)
    }

    /// Returns true if `key` is present, changed or not.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterates over keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Inserts a value.
    pub fn insert_updated(&mut self, key: K, value: T) {
        self.entries.insert(key, DeltaEntry::Updated(value));
    }

    /// Inserts the unchanged marker.
    pub fn insert_unchanged(&mut self, key: K) {
        self.entries.insert(key, DeltaEntry::Unchanged);
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &K) -> Option<DeltaEntry<T>> {
        self.entries.remove(key)
    }
}

impl<K: Eq + Hash, T> Default for KeyedList<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, T> FromIterator<(K, DeltaEntry<T>)> for KeyedList<K, T> {
    fn from_iter<I: IntoIterator<Item = (K, DeltaEntry<T>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<K, T> UpdateableList for KeyedList<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: UpdateableElement,
{
    type Key = K;
    type Element = T;

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> Entries<'_, K, DeltaEntry<T>> {
        Box::new(self.entries.iter())
    }

    fn get(&self, key: &K) -> Option<&DeltaEntry<T>> {
        self.entries.get(key)
    }

    fn set(&mut self, key: K, entry: DeltaEntry<T>) {
        self.entries.insert(key, entry);
    }

    fn reset(&mut self) {
        self.entries = HashMap::new();
    }
}

/// Hash-map backed [`NonUpdateableList`], used for shared definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionMap<K: Eq + Hash, V> {
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash, V> DefinitionMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Looks up a definition.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterates over all definitions.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

impl<K: Eq + Hash, V> Default for DefinitionMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for DefinitionMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<K, V> NonUpdateableList for DefinitionMap<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Key = K;
    type Value = V;

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> Entries<'_, K, V> {
        Box::new(self.entries.iter())
    }

    fn upsert(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    fn reset(&mut self) {
        self.entries = HashMap::new();
    }
}

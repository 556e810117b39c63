//! Multi-collection objects and the type-erased views the reconciler pairs.
//!
//! A decoded response is an [`UpdateableObject`]: a bag of collections, each
//! identified by a type tag. The reconciler never sees concrete collection
//! types; it works through [`UpdateableCollection`] and
//! [`NonUpdateableCollection`], which every [`UpdateableList`] and
//! [`NonUpdateableList`] implements automatically.

use crate::element::{DeltaEntry, UpdateableElement};
use crate::error::{DiffError, DiffResult, InconsistencyReason};
use crate::list::{NonUpdateableList, UpdateableList};
use chrono::{DateTime, Utc};
use std::any::Any;

/// A decoded response or cache made of tagged collections.
pub trait UpdateableObject: Send + Sync + 'static {
    /// Collections whose entities carry timestamps and sentinel markers.
    fn updateables(&self) -> Vec<&dyn UpdateableCollection>;

    /// Mutable access to the same collections, in the same order.
    fn updateables_mut(&mut self) -> Vec<&mut dyn UpdateableCollection>;

    /// Collections merged additively by key.
    fn non_updateables(&self) -> Vec<&dyn NonUpdateableCollection> {
        Vec::new()
    }

    /// Mutable access to the same collections, in the same order.
    fn non_updateables_mut(&mut self) -> Vec<&mut dyn NonUpdateableCollection> {
        Vec::new()
    }
}

/// What a delta collection contains relative to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionScan {
    /// Entries carrying a new value.
    pub updated: usize,
    /// Entries carrying the unchanged marker.
    pub unchanged: usize,
    /// Cached keys absent from the delta.
    pub missing: usize,
    /// Latest modification timestamp among updated entries.
    pub latest: Option<DateTime<Utc>>,
}

impl CollectionScan {
    /// Returns true if at least one entry carries a new value.
    pub fn changed(&self) -> bool {
        self.updated > 0
    }
}

/// Type-erased view of an [`UpdateableList`].
pub trait UpdateableCollection: Send + Sync {
    /// Type tag of the underlying list.
    fn tag(&self) -> &'static str;

    /// Number of keys, including unchanged ones.
    fn key_count(&self) -> usize;

    /// Replaces every unchanged marker with the value held by `cache`.
    ///
    /// Only `self` is modified. Fails if `cache` is a different collection
    /// type or cannot supply a value for an unchanged key.
    fn resolve_unchanged(&mut self, cache: &dyn UpdateableCollection)
        -> DiffResult<CollectionScan>;

    /// Resets `cache` and refills it with exactly the entries of `self`.
    fn replace_into(&self, cache: &mut dyn UpdateableCollection) -> DiffResult<()>;

    /// Removes every entry.
    fn clear(&mut self);

    /// Upcast for downcasting to the concrete list.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete list.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<L: UpdateableList> UpdateableCollection for L {
    fn tag(&self) -> &'static str {
        UpdateableList::kind(self)
    }

    fn key_count(&self) -> usize {
        UpdateableList::len(self)
    }

    fn resolve_unchanged(
        &mut self,
        cache: &dyn UpdateableCollection,
    ) -> DiffResult<CollectionScan> {
        let tag = UpdateableList::kind(self);
        let cache = cache
            .as_any()
            .downcast_ref::<L>()
            .ok_or_else(|| DiffError::schema_mismatch(tag))?;

        let mut scan = CollectionScan::default();
        let mut carried = Vec::new();

        for (key, entry) in UpdateableList::entries(self) {
            match entry {
                DeltaEntry::Unchanged => {
                    match UpdateableList::get(cache, key) {
                        Some(DeltaEntry::Updated(value)) => {
                            carried.push((key.clone(), value.clone()));
                        }
                        Some(DeltaEntry::Unchanged) => {
                            return Err(DiffError::inconsistent(
                                tag,
                                key,
                                InconsistencyReason::UnchangedInCache,
                            ));
                        }
                        None => {
                            return Err(DiffError::inconsistent(
                                tag,
                                key,
                                InconsistencyReason::MissingFromCache,
                            ));
                        }
                    }
                    scan.unchanged += 1;
                }
                DeltaEntry::Updated(value) => {
                    scan.updated += 1;
                    let updated_at = value.updated_at();
                    if scan.latest.map_or(true, |latest| updated_at > latest) {
                        scan.latest = Some(updated_at);
                    }
                }
            }
        }

        scan.missing = UpdateableList::entries(cache)
            .filter(|(key, _)| UpdateableList::get(self, *key).is_none())
            .count();

        for (key, value) in carried {
            UpdateableList::set(self, key, DeltaEntry::Updated(value));
        }

        Ok(scan)
    }

    fn replace_into(&self, cache: &mut dyn UpdateableCollection) -> DiffResult<()> {
        let tag = UpdateableList::kind(self);
        let cache = cache
            .as_any_mut()
            .downcast_mut::<L>()
            .ok_or_else(|| DiffError::schema_mismatch(tag))?;

        UpdateableList::reset(cache);
        for (key, entry) in UpdateableList::entries(self) {
            UpdateableList::set(cache, key.clone(), entry.clone());
        }
        Ok(())
    }

    fn clear(&mut self) {
        UpdateableList::reset(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Type-erased view of a [`NonUpdateableList`].
pub trait NonUpdateableCollection: Send + Sync {
    /// Type tag of the underlying list.
    fn tag(&self) -> &'static str;

    /// Number of entries.
    fn key_count(&self) -> usize;

    /// Returns true if `cache` is the same concrete collection type.
    fn accepts(&self, cache: &dyn NonUpdateableCollection) -> bool;

    /// Overwrites `cache` entries by key with those of `self`.
    ///
    /// Returns the number of entries written.
    fn merge_into(&self, cache: &mut dyn NonUpdateableCollection) -> DiffResult<usize>;

    /// Removes every entry.
    fn clear(&mut self);

    /// Upcast for downcasting to the concrete list.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete list.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<L: NonUpdateableList> NonUpdateableCollection for L {
    fn tag(&self) -> &'static str {
        NonUpdateableList::kind(self)
    }

    fn key_count(&self) -> usize {
        NonUpdateableList::len(self)
    }

    fn accepts(&self, cache: &dyn NonUpdateableCollection) -> bool {
        cache.as_any().is::<L>()
    }

    fn merge_into(&self, cache: &mut dyn NonUpdateableCollection) -> DiffResult<usize> {
        let tag = NonUpdateableList::kind(self);
        let cache = cache
            .as_any_mut()
            .downcast_mut::<L>()
            .ok_or_else(|| DiffError::schema_mismatch(tag))?;

        let mut written = 0;
        for (key, value) in NonUpdateableList::entries(self) {
            cache.upsert(key.clone(), value.clone());
            written += 1;
        }
        Ok(written)
    }

    fn clear(&mut self) {
        NonUpdateableList::reset(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

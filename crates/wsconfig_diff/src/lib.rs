//! # wsconfig diff
//!
//! Sentinel-aware reconciliation of incremental configuration responses.
//!
//! This crate provides:
//! - `UpdateableElement` / `DeltaEntry` for timestamped entities and the
//!   "unchanged since watermark" marker
//! - `UpdateableList` / `NonUpdateableList` collection contracts, with
//!   hash-map backed `KeyedList` and `DefinitionMap`
//! - `UpdateableObject` for responses made of several tagged collections
//! - `Reconciler` for merging a delta into a cache
//! - `Watermark`, the cursor for the next incremental fetch
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Merge rules
//!
//! - An unchanged entry must resolve to a value already in the cache
//! - A collection with at least one updated entry replaces the cached key set,
//!   dropping keys the delta no longer lists
//! - A collection with only unchanged entries leaves the cache untouched
//! - Definitions (non-updateable collections) are overwritten by key, never
//!   deleted
//! - The watermark only moves forward, and only when a value was updated
//! - A failed merge leaves the cache untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod element;
mod error;
mod list;
mod object;
mod reconciler;
mod watermark;

pub use element::{DeltaEntry, UpdateableElement};
pub use error::{DiffError, DiffResult, InconsistencyReason};
pub use list::{DefinitionMap, Entries, KeyedList, NonUpdateableList, UpdateableList};
pub use object::{CollectionScan, NonUpdateableCollection, UpdateableCollection, UpdateableObject};
pub use reconciler::{MergeOutcome, Reconciler};
pub use watermark::Watermark;

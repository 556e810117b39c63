//! Delta reconciliation.
//!
//! [`Reconciler::merge`] applies a decoded delta to a cache in two phases.
//! The validation phase pairs every delta collection with its cache
//! counterpart and resolves unchanged markers from the cache, touching only
//! the delta. The commit phase then rewrites the cache. Every error is raised
//! in the first phase, so a failed merge never leaves a partial update.
//!
//! A collection whose delta holds only unchanged markers is left untouched in
//! the cache, even if the delta omits some cached keys. An all-unchanged
//! response cannot tell "nothing changed" apart from "entities were deleted",
//! so deletions are only applied alongside at least one updated entity.

use crate::error::{DiffError, DiffResult};
use crate::object::{CollectionScan, UpdateableObject};
use crate::watermark::Watermark;

/// Result of a successful merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Watermark to send with the next fetch.
    pub watermark: Watermark,
    /// Whether any updateable collection in the cache was rewritten.
    pub changed: bool,
    /// Entities carrying a new value across all collections.
    pub updated: usize,
    /// Cached entities dropped because the delta no longer lists them.
    pub removed: usize,
    /// Non-updateable entries written.
    pub definitions: usize,
}

/// Merges deltas into a cache and tracks the watermark across calls.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    watermark: Watermark,
}

impl Reconciler {
    /// Creates a reconciler starting from the zero watermark.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reconciler resuming from a known watermark.
    pub fn with_watermark(watermark: Watermark) -> Self {
        Self { watermark }
    }

    /// Returns the watermark retained from previous merges.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Forgets the retained watermark.
    pub fn reset(&mut self) {
        self.watermark = Watermark::ZERO;
    }

    /// Merges `delta` into `cache`.
    ///
    /// Unchanged markers in `delta` are replaced by cached values as a side
    /// effect; callers should treat `delta` as consumed.
    pub fn merge<D, C>(&mut self, delta: &mut D, cache: &mut C) -> DiffResult<MergeOutcome>
    where
        D: UpdateableObject + ?Sized,
        C: UpdateableObject + ?Sized,
    {
        let total_keys: usize = delta.updateables().iter().map(|c| c.key_count()).sum();
        if total_keys == 0 {
            return Err(DiffError::EmptyDelta);
        }

        let updateable_plan = Self::resolve_updateables(delta, cache)?;
        let definition_plan = Self::pair_non_updateables(delta, cache)?;

        let mut outcome = MergeOutcome::default();
        let mut latest = None;

        {
            let deltas = delta.updateables();
            let mut caches = cache.updateables_mut();
            for (from, to, scan) in &updateable_plan {
                if let Some(ts) = scan.latest {
                    if latest.map_or(true, |l| ts > l) {
                        latest = Some(ts);
                    }
                }
                if !scan.changed() {
                    continue;
                }
                deltas[*from].replace_into(&mut *caches[*to])?;
                outcome.changed = true;
                outcome.updated += scan.updated;
                outcome.removed += scan.missing;
            }
        }

        {
            let deltas = delta.non_updateables();
            let mut caches = cache.non_updateables_mut();
            for (from, to) in &definition_plan {
                outcome.definitions += deltas[*from].merge_into(&mut *caches[*to])?;
            }
        }

        // An all-unchanged response carries no new timestamp; keep the old one.
        if let Some(ts) = latest {
            self.watermark.advance(ts);
        }
        outcome.watermark = self.watermark;

        Ok(outcome)
    }

    fn resolve_updateables<D, C>(
        delta: &mut D,
        cache: &C,
    ) -> DiffResult<Vec<(usize, usize, CollectionScan)>>
    where
        D: UpdateableObject + ?Sized,
        C: UpdateableObject + ?Sized,
    {
        let targets = cache.updateables();
        let mut collections = delta.updateables_mut();
        let pairs = pair_by_tag(
            collections.iter().map(|c| c.tag()),
            targets.iter().map(|t| t.tag()),
        )?;

        let mut plan = Vec::with_capacity(pairs.len());
        for (from, to) in pairs {
            let scan = collections[from].resolve_unchanged(targets[to])?;
            plan.push((from, to, scan));
        }

        Ok(plan)
    }

    fn pair_non_updateables<D, C>(delta: &D, cache: &C) -> DiffResult<Vec<(usize, usize)>>
    where
        D: UpdateableObject + ?Sized,
        C: UpdateableObject + ?Sized,
    {
        let targets = cache.non_updateables();
        let collections = delta.non_updateables();
        let pairs = pair_by_tag(
            collections.iter().map(|c| c.tag()),
            targets.iter().map(|t| t.tag()),
        )?;

        for &(from, to) in &pairs {
            if !collections[from].accepts(targets[to]) {
                return Err(DiffError::schema_mismatch(collections[from].tag()));
            }
        }

        Ok(pairs)
    }
}

/// Pairs the n-th delta collection carrying a tag with the n-th cache
/// collection carrying the same tag, so same-typed collections keep their
/// declaration order.
fn pair_by_tag<'a>(
    delta_tags: impl Iterator<Item = &'a str>,
    cache_tags: impl Iterator<Item = &'a str>,
) -> DiffResult<Vec<(usize, usize)>> {
    let cache_tags: Vec<&str> = cache_tags.collect();
    let mut taken = vec![false; cache_tags.len()];
    let mut pairs = Vec::new();

    for (from, tag) in delta_tags.enumerate() {
        let to = (0..cache_tags.len())
            .find(|&i| !taken[i] && cache_tags[i] == tag)
            .ok_or_else(|| DiffError::schema_mismatch(tag))?;
        taken[to] = true;
        pairs.push((from, to));
    }

    Ok(pairs)
}


//! Subscribable configuration cache.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use wsconfig_diff::{MergeOutcome, Reconciler, UpdateableObject, Watermark};

use crate::error::SyncResult;
use crate::fetcher::DeltaHandler;

/// Sent to every subscriber after each successful [`ConfigCache::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Position of the merge, starting at 1.
    pub sequence: u64,
    /// Watermark after the merge.
    pub watermark: Watermark,
    /// Whether the merge rewrote any cached collection.
    pub changed: bool,
}

/// Receiving end of a cache subscription.
///
/// Notifications arrive in merge order. The cache waits for room in the
/// channel before moving on, so a subscriber that stops reading holds up
/// later merges; drop the subscription to leave.
///
/// A `set` that is abandoned while waiting on a slow subscriber (for
/// example when the poller is cancelled at shutdown) has already committed
/// its merge, so subscribers later in the list never see that notification.
/// Compare [`Notification::sequence`] values to detect the gap.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Notification>,
}

impl Subscription {
    /// Waits for the next notification.
    ///
    /// Returns `None` once the cache is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Takes a notification if one is waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }
}

struct CacheState<O> {
    object: O,
    reconciler: Reconciler,
    merges: u64,
}

/// The merged view of every delta applied so far.
///
/// Reads return deep copies and never observe a half-applied merge.
/// Writes are serialized: each [`set`](Self::set) merges, then notifies all
/// subscribers before the next `set` may start.
pub struct ConfigCache<O> {
    state: Mutex<CacheState<O>>,
    subscribers: Mutex<Vec<mpsc::Sender<Notification>>>,
    writer: tokio::sync::Mutex<()>,
    buffer: usize,
}

impl<O: UpdateableObject + Default + Clone> ConfigCache<O> {
    /// Creates an empty cache whose subscribers buffer one notification.
    pub fn new() -> Self {
        Self::with_buffer(1)
    }

    /// Creates an empty cache with the given per-subscriber capacity.
    ///
    /// A zero capacity is raised to one.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                object: O::default(),
                reconciler: Reconciler::new(),
                merges: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
            writer: tokio::sync::Mutex::new(()),
            buffer: buffer.max(1),
        }
    }

    /// Seeds the cache with a previously merged object and its watermark.
    ///
    /// Use this together with [`Poller::with_watermark`](crate::Poller::with_watermark)
    /// when resuming from persisted state: incremental responses mark
    /// untouched entities as unchanged, and those markers only resolve
    /// against a cache that already holds them. `object` must not contain
    /// unchanged markers itself.
    pub fn with_snapshot(self, object: O, watermark: Watermark) -> Self {
        {
            let mut state = self.state.lock();
            state.object = object;
            state.reconciler = Reconciler::with_watermark(watermark);
        }
        self
    }

    /// Returns a copy of the cached object.
    pub fn get(&self) -> O {
        self.state.lock().object.clone()
    }

    /// Returns the watermark of the merged data.
    pub fn watermark(&self) -> Watermark {
        self.state.lock().reconciler.watermark()
    }

    /// Merges `delta` into the cache and notifies subscribers.
    ///
    /// A rejected delta leaves the cache untouched and notifies nobody.
    ///
    /// The merge commits before any subscriber is notified. Dropping the
    /// future while it waits on a full subscriber keeps the merge and skips
    /// the remaining notifications.
    pub async fn set(&self, mut delta: O) -> SyncResult<MergeOutcome> {
        let _writer = self.writer.lock().await;

        let (outcome, sequence) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let outcome = state.reconciler.merge(&mut delta, &mut state.object)?;
            state.merges += 1;
            (outcome, state.merges)
        };
        debug!(
            sequence,
            watermark = %outcome.watermark,
            changed = outcome.changed,
            removed = outcome.removed,
            "merged workspace configs"
        );

        self.notify(Notification {
            sequence,
            watermark: outcome.watermark,
            changed: outcome.changed,
        })
        .await;
        Ok(outcome)
    }

    async fn notify(&self, notification: Notification) {
        let subscribers = self.subscribers.lock().clone();
        let mut closed = 0;
        for tx in &subscribers {
            if tx.send(notification).await.is_err() {
                closed += 1;
            }
        }

        if closed > 0 {
            self.subscribers.lock().retain(|tx| !tx.is_closed());
            trace!(closed, "dropped closed subscribers");
        }
    }

    /// Registers a subscriber for future merges.
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        self.subscribers.lock().push(tx);
        Subscription { receiver }
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Empties the cache and forgets the watermark.
    ///
    /// Subscribers stay registered. The next delta must be a full snapshot.
    pub async fn reset(&self) {
        let _writer = self.writer.lock().await;
        let mut state = self.state.lock();
        state.object = O::default();
        state.reconciler.reset();
    }
}

impl<O: UpdateableObject + Default + Clone> Default for ConfigCache<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> std::fmt::Debug for ConfigCache<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConfigCache")
            .field("watermark", &state.reconciler.watermark())
            .field("merges", &state.merges)
            .field("subscribers", &self.subscribers.lock().len())
            .finish_non_exhaustive()
    }
}

impl<O: UpdateableObject + Default + Clone> DeltaHandler<O> for ConfigCache<O> {
    async fn handle(&self, delta: O) -> SyncResult<MergeOutcome> {
        self.set(delta).await
    }
}

//! Poller and cache wired together behind one handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wsconfig_diff::{UpdateableObject, Watermark};

use crate::cache::{ConfigCache, Subscription};
use crate::config::SyncOptions;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::DeltaFetcher;
use crate::poller::{Poller, PollerState, PollerStats};

type CachePoller<O, F> = Poller<O, F, Arc<ConfigCache<O>>>;

/// A running configuration sync.
///
/// Owns a background task that polls `F` into a [`ConfigCache`]. Dropping
/// the handle cancels the task without waiting; use [`close`](Self::close)
/// to wait for it.
pub struct ConfigSync<O, F> {
    cache: Arc<ConfigCache<O>>,
    poller: Arc<CachePoller<O, F>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<O, F> ConfigSync<O, F>
where
    O: UpdateableObject + Default + Clone,
    F: DeltaFetcher<O> + 'static,
{
    /// Validates `options` and starts polling on the current Tokio runtime.
    pub fn start(fetcher: F, options: SyncOptions) -> SyncResult<Self> {
        let cache = ConfigCache::with_buffer(options.notification_buffer);
        Self::spawn(fetcher, options, cache, Watermark::ZERO)
    }

    /// Starts polling from persisted state.
    ///
    /// `snapshot` is the configuration merged up to `watermark`. Both the
    /// cache and the first request resume from it, so the next response
    /// may be incremental.
    pub fn resume(
        fetcher: F,
        options: SyncOptions,
        snapshot: O,
        watermark: Watermark,
    ) -> SyncResult<Self> {
        let cache = ConfigCache::with_buffer(options.notification_buffer)
            .with_snapshot(snapshot, watermark);
        Self::spawn(fetcher, options, cache, watermark)
    }

    fn spawn(
        fetcher: F,
        options: SyncOptions,
        cache: ConfigCache<O>,
        watermark: Watermark,
    ) -> SyncResult<Self> {
        options.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| SyncError::Task(err.to_string()))?;

        let cache = Arc::new(cache);
        let poller = Poller::new(options.poller, fetcher, Arc::clone(&cache))?
            .with_watermark(watermark);
        let poller = Arc::new(poller);
        let cancel = CancellationToken::new();

        let task = {
            let poller = Arc::clone(&poller);
            let cancel = cancel.clone();
            runtime.spawn(async move { poller.run(cancel).await })
        };

        Ok(Self {
            cache,
            poller,
            cancel,
            task: Some(task),
        })
    }

    /// Returns a copy of the cached configuration.
    pub fn get(&self) -> O {
        self.cache.get()
    }

    /// Registers a subscriber for future merges.
    pub fn subscribe(&self) -> Subscription {
        self.cache.subscribe()
    }

    /// Gets the watermark the next poll will send.
    pub fn watermark(&self) -> Watermark {
        self.poller.watermark()
    }

    /// Gets the poller state.
    pub fn state(&self) -> PollerState {
        self.poller.state()
    }

    /// Gets the poller stats.
    pub fn stats(&self) -> PollerStats {
        self.poller.stats()
    }

    /// Gets the underlying cache.
    pub fn cache(&self) -> &Arc<ConfigCache<O>> {
        &self.cache
    }

    /// Returns true until the polling task has finished.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops polling and waits up to `timeout` for the task to exit.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self, timeout: Duration) -> SyncResult<()> {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => {
                info!(watermark = %self.poller.watermark(), "config sync closed");
                Ok(())
            }
            Ok(Err(err)) => Err(SyncError::Task(err.to_string())),
            Err(_) => Err(SyncError::Timeout),
        }
    }
}

impl<O, F> Drop for ConfigSync<O, F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<O, F> std::fmt::Debug for ConfigSync<O, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSync")
            .field("cache", &self.cache)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

//! Interval polling with exponential backoff.
//!
//! A [`Poller`] asks its fetcher for everything updated after its current
//! watermark and hands the response to its handler. Polls happen once per
//! interval. A failed poll is retried on an [`ExponentialBackoff`]
//! schedule; when the schedule is exhausted the poller logs, gives up on
//! that episode and waits for the next interval tick. Only a successful
//! poll moves the watermark.

use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wsconfig_diff::{MergeOutcome, Watermark};

use crate::backoff::ExponentialBackoff;
use crate::config::PollerConfig;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::{DeltaFetcher, DeltaHandler};

/// Callback invoked after every poll attempt with `(changed, error)`.
pub type ResponseObserver = Box<dyn Fn(bool, Option<&SyncError>) + Send + Sync>;

/// What the poller is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Waiting for the next interval tick.
    Idle,
    /// A fetch or handler call is in flight.
    Polling,
    /// Waiting before retry number `attempt` of a failure episode.
    Backoff {
        /// One-based retry number.
        attempt: u32,
    },
    /// The last failure episode ran out of retries.
    GivenUp,
    /// The loop has exited.
    Stopped,
}

impl PollerState {
    /// Returns true while a failure episode is being retried.
    pub fn is_backing_off(&self) -> bool {
        matches!(self, PollerState::Backoff { .. })
    }
}

/// Counters describing the poller's history.
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    /// Poll attempts, retries included.
    pub polls: u64,
    /// Attempts that fetched and handled a delta.
    pub successes: u64,
    /// Attempts that failed.
    pub failures: u64,
    /// Attempts made from a backoff schedule.
    pub retries: u64,
    /// Failure episodes that ran out of retries.
    pub episodes_given_up: u64,
    /// Successful attempts that changed the cache.
    pub changes: u64,
    /// Time of the last successful attempt.
    pub last_success: Option<Instant>,
    /// Message of the last failed attempt.
    pub last_error: Option<String>,
}

/// Periodically pulls deltas from a [`DeltaFetcher`] into a [`DeltaHandler`].
///
/// All methods take `&self`; wrap the poller in an `Arc` to observe it
/// while [`run`](Self::run) executes on another task.
pub struct Poller<O, F, H> {
    config: PollerConfig,
    fetcher: F,
    handler: H,
    watermark: Mutex<Watermark>,
    state: RwLock<PollerState>,
    stats: RwLock<PollerStats>,
    observer: Option<ResponseObserver>,
    _object: PhantomData<fn() -> O>,
}

impl<O, F, H> Poller<O, F, H>
where
    O: Default + Send,
    F: DeltaFetcher<O>,
    H: DeltaHandler<O>,
{
    /// Creates a poller, rejecting out-of-range configuration.
    pub fn new(config: PollerConfig, fetcher: F, handler: H) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher,
            handler,
            watermark: Mutex::new(Watermark::ZERO),
            state: RwLock::new(PollerState::Idle),
            stats: RwLock::new(PollerStats::default()),
            observer: None,
            _object: PhantomData,
        })
    }

    /// Starts from a previously persisted watermark instead of zero.
    ///
    /// The handler must already hold the data merged up to `watermark`, as
    /// with [`ConfigCache::with_snapshot`](crate::ConfigCache::with_snapshot).
    /// Otherwise the first incremental response refers to entities the
    /// handler has never seen and is rejected.
    pub fn with_watermark(self, watermark: Watermark) -> Self {
        *self.watermark.lock() = watermark;
        self
    }

    /// Registers a callback run after every poll attempt.
    pub fn on_response(
        mut self,
        observer: impl Fn(bool, Option<&SyncError>) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Gets the watermark the next poll will send.
    pub fn watermark(&self) -> Watermark {
        *self.watermark.lock()
    }

    /// Gets the current state.
    pub fn state(&self) -> PollerState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> PollerStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: PollerState) {
        *self.state.write() = state;
    }

    /// Runs the polling loop until `cancel` fires.
    ///
    /// Cancellation is observed while waiting for a tick, while backing off
    /// and while a poll is in flight. The merge itself is synchronous and is
    /// never torn.
    ///
    /// A handler may commit a merge and then await something else, as
    /// [`ConfigCache::set`](crate::ConfigCache::set) does while notifying
    /// subscribers. Cancelling at that point drops the rest of the handler
    /// and the poller never records the new watermark, so
    /// [`watermark`](Self::watermark) can lag behind the handler's own.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            watermark = %self.watermark(),
            "workspace config poller started"
        );

        let mut flow = ControlFlow::Continue(());
        if self.config.poll_on_start {
            // A failed first poll waits for the next tick rather than backing off.
            flow = tokio::select! {
                biased;
                _ = cancel.cancelled() => ControlFlow::Break(()),
                _ = self.attempt(false) => ControlFlow::Continue(()),
            };
        }

        while flow.is_continue() {
            flow = self.tick(&cancel).await;
        }

        self.set_state(PollerState::Stopped);
        info!(watermark = %self.watermark(), "workspace config poller stopped");
    }

    async fn tick(&self, cancel: &CancellationToken) -> ControlFlow<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ControlFlow::Break(()),
            _ = tokio::time::sleep(self.config.interval()) => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ControlFlow::Break(()),
            result = self.attempt(false) => result,
        };

        match result {
            Ok(_) => ControlFlow::Continue(()),
            Err(_) => self.retry_with_backoff(cancel).await,
        }
    }

    async fn retry_with_backoff(&self, cancel: &CancellationToken) -> ControlFlow<()> {
        let mut backoff = ExponentialBackoff::new(&self.config.backoff);

        while let Some(delay) = backoff.next_delay() {
            let attempt = backoff.retries();
            self.set_state(PollerState::Backoff { attempt });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ControlFlow::Break(()),
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ControlFlow::Break(()),
                result = self.attempt(true) => result,
            };

            match result {
                Ok(_) => return ControlFlow::Continue(()),
                Err(err) => warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "retry failed"
                ),
            }
        }

        self.set_state(PollerState::GivenUp);
        let last_error = {
            let mut stats = self.stats.write();
            stats.episodes_given_up += 1;
            stats.last_error.clone().unwrap_or_default()
        };
        error!(
            retries = backoff.retries(),
            elapsed_ms = u64::try_from(backoff.elapsed().as_millis()).unwrap_or(u64::MAX),
            error = %last_error,
            "giving up on workspace configs until the next interval"
        );
        ControlFlow::Continue(())
    }

    /// Performs a single poll outside the loop.
    pub async fn poll_once(&self) -> SyncResult<MergeOutcome> {
        self.attempt(false).await
    }

    async fn attempt(&self, retry: bool) -> SyncResult<MergeOutcome> {
        self.set_state(PollerState::Polling);
        let result = self.poll().await;

        {
            let mut stats = self.stats.write();
            stats.polls += 1;
            if retry {
                stats.retries += 1;
            }
            match &result {
                Ok(outcome) => {
                    stats.successes += 1;
                    if outcome.changed {
                        stats.changes += 1;
                    }
                    stats.last_success = Some(Instant::now());
                    stats.last_error = None;
                }
                Err(err) => {
                    stats.failures += 1;
                    stats.last_error = Some(err.to_string());
                }
            }
        }

        self.set_state(PollerState::Idle);
        if let Err(err) = &result {
            if !retry {
                error!(error = %err, "failed to poll workspace configs");
            }
        }

        if let Some(observer) = &self.observer {
            let changed = result.as_ref().is_ok_and(|outcome| outcome.changed);
            observer(changed, result.as_ref().err());
        }
        result
    }

    async fn poll(&self) -> SyncResult<MergeOutcome> {
        let updated_after = self.watermark();
        debug!(%updated_after, "fetching workspace configs");

        let mut response = O::default();
        self.fetcher
            .fetch(&mut response, updated_after)
            .await
            .map_err(SyncError::Fetch)?;

        let outcome = self.handler.handle(response).await?;
        if !outcome.watermark.is_zero() {
            *self.watermark.lock() = outcome.watermark;
        }
        debug!(
            watermark = %outcome.watermark,
            changed = outcome.changed,
            updated = outcome.updated,
            "handled workspace configs"
        );
        Ok(outcome)
    }
}

impl<O, F, H> std::fmt::Debug for Poller<O, F, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .field("watermark", &*self.watermark.lock())
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

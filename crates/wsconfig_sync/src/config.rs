//! Configuration for the poller and the sync service.
//!
//! Durations are stored in milliseconds so the structs deserialize from
//! plain numbers; the `with_*` builders and accessors work in [`Duration`].

use std::time::Duration;

use serde::Deserialize;

use crate::error::{SyncError, SyncResult};

/// Configuration for the polling loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PollerConfig {
    /// Time between successive polls (unit: milliseconds).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Whether to poll once immediately when the loop starts.
    #[serde(default = "default_poll_on_start")]
    pub poll_on_start: bool,

    /// Backoff applied after a failed poll.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl PollerConfig {
    /// Creates a configuration polling at the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: millis(interval),
            ..Self::default()
        }
    }

    /// Sets the polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = millis(interval);
        self
    }

    /// Sets whether the first poll happens immediately.
    pub fn with_poll_on_start(mut self, poll_on_start: bool) -> Self {
        self.poll_on_start = poll_on_start;
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the polling interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> SyncResult<()> {
        if self.interval_ms == 0 {
            return Err(SyncError::invalid_config("poll interval must be positive"));
        }
        self.backoff.validate()
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            poll_on_start: default_poll_on_start(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Configuration for exponential backoff between retries.
///
/// Each delay is drawn uniformly from
/// `[d * (1 - randomization_factor), d * (1 + randomization_factor)]`,
/// where `d` starts at `initial_interval_ms`, grows by `multiplier` after
/// every retry and never exceeds `max_interval_ms`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay (unit: milliseconds).
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Upper bound for the un-randomized delay (unit: milliseconds).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Growth factor applied after every retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter as a fraction of the current delay, in `[0, 1]`.
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    /// Give up once this much time has passed since the first failure
    /// (unit: milliseconds). `None` never gives up on time.
    #[serde(default = "default_max_elapsed_time_ms")]
    pub max_elapsed_time_ms: Option<u64>,

    /// Give up after this many retries. `None` never gives up on count.
    #[serde(default = "default_max_retries")]
    pub max_retries: Option<u32>,
}

impl BackoffConfig {
    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: Some(0),
            ..Self::default()
        }
    }

    /// Creates a configuration with fixed, un-randomized delays.
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial_interval_ms: millis(delay),
            max_interval_ms: millis(delay),
            multiplier: 1.0,
            randomization_factor: 0.0,
            ..Self::default()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_interval(mut self, delay: Duration) -> Self {
        self.initial_interval_ms = millis(delay);
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_interval(mut self, delay: Duration) -> Self {
        self.max_interval_ms = millis(delay);
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the randomization factor.
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    /// Sets the elapsed-time limit.
    pub fn with_max_elapsed_time(mut self, limit: Option<Duration>) -> Self {
        self.max_elapsed_time_ms = limit.map(millis);
        self
    }

    /// Sets the retry limit.
    pub fn with_max_retries(mut self, limit: Option<u32>) -> Self {
        self.max_retries = limit;
        self
    }

    /// Returns the initial delay.
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Returns the maximum delay.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Returns the elapsed-time limit.
    pub fn max_elapsed_time(&self) -> Option<Duration> {
        self.max_elapsed_time_ms.map(Duration::from_millis)
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> SyncResult<()> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(SyncError::invalid_config(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(SyncError::invalid_config(format!(
                "randomization factor must be within [0, 1], got {}",
                self.randomization_factor
            )));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(SyncError::invalid_config(
                "max backoff interval is shorter than the initial interval",
            ));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
            max_elapsed_time_ms: default_max_elapsed_time_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Configuration for [`ConfigSync`](crate::ConfigSync).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncOptions {
    /// Poller settings.
    #[serde(default)]
    pub poller: PollerConfig,

    /// Capacity of each subscriber's notification channel.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

impl SyncOptions {
    /// Sets the poller configuration.
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Sets the subscriber channel capacity.
    pub fn with_notification_buffer(mut self, capacity: usize) -> Self {
        self.notification_buffer = capacity;
        self
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> SyncResult<()> {
        if self.notification_buffer == 0 {
            return Err(SyncError::invalid_config(
                "notification buffer must hold at least one notification",
            ));
        }
        self.poller.validate()
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_interval_ms() -> u64 {
    1_000
}
fn default_poll_on_start() -> bool {
    true
}
fn default_initial_interval_ms() -> u64 {
    1_000
}
fn default_max_interval_ms() -> u64 {
    60_000
}
fn default_multiplier() -> f64 {
    1.5
}
fn default_randomization_factor() -> f64 {
    0.5
}
fn default_max_elapsed_time_ms() -> Option<u64> {
    Some(300_000)
}
fn default_max_retries() -> Option<u32> {
    Some(15)
}
fn default_notification_buffer() -> usize {
    1
}

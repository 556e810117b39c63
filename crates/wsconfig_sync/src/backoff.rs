//! Exponential backoff with randomized delays.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::BackoffConfig;

/// Delay sequence for one run of retries.
///
/// A fresh instance is created for every failure episode, so the delays
/// restart from the initial interval after a successful poll. The clock is
/// Tokio's, which lets paused-time tests drive it.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    retries: u32,
    started: Instant,
}

impl ExponentialBackoff {
    /// Starts a new delay sequence.
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            config: config.clone(),
            current: config.initial_interval(),
            retries: 0,
            started: Instant::now(),
        }
    }

    /// Returns how many delays have been handed out.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Returns the time since the sequence started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns the next delay, or `None` once a limit is reached.
    ///
    /// The elapsed-time limit stops the sequence when waiting the next
    /// delay would overshoot it.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_retries
            .is_some_and(|limit| self.retries >= limit)
        {
            return None;
        }

        let delay = randomize(self.current, self.config.randomization_factor);
        self.grow();

        if let Some(limit) = self.config.max_elapsed_time() {
            if self.elapsed() + delay > limit {
                return None;
            }
        }

        self.retries += 1;
        Some(delay)
    }

    fn grow(&mut self) {
        let max = self.config.max_interval();
        let next = (self.current.as_nanos() as f64 * self.config.multiplier).round();
        self.current = if next >= max.as_nanos() as f64 {
            max
        } else {
            Duration::from_nanos(next as u64)
        };
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_delay()
    }
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let nanos = interval.as_nanos() as f64;
    let delta = nanos * factor;
    let drawn = rand::thread_rng().gen_range((nanos - delta)..=(nanos + delta));
    Duration::from_nanos(drawn.round() as u64)
}

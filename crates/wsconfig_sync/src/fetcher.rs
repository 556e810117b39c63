//! Collaborator seams of the poller.
//!
//! The poller never talks to the network itself. A [`DeltaFetcher`] fills
//! a fresh response object with everything updated after a watermark, and
//! a [`DeltaHandler`] folds that response into local state.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use wsconfig_diff::{MergeOutcome, Watermark};

use crate::error::{FetchError, SyncResult};

/// Fetches the configuration delta newer than a watermark.
///
/// A zero watermark asks for a full snapshot.
pub trait DeltaFetcher<O>: Send + Sync {
    /// Populates `target` with the delta updated after `updated_after`.
    fn fetch(
        &self,
        target: &mut O,
        updated_after: Watermark,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// Consumes a fetched delta.
///
/// The returned outcome's watermark becomes the poller's next
/// `updated_after` unless it is zero.
pub trait DeltaHandler<O>: Send + Sync {
    /// Handles one delta.
    fn handle(&self, delta: O) -> impl Future<Output = SyncResult<MergeOutcome>> + Send;
}

impl<O, F: DeltaFetcher<O>> DeltaFetcher<O> for Arc<F> {
    fn fetch(
        &self,
        target: &mut O,
        updated_after: Watermark,
    ) -> impl Future<Output = Result<(), FetchError>> + Send {
        (**self).fetch(target, updated_after)
    }
}

impl<O, H: DeltaHandler<O>> DeltaHandler<O> for Arc<H> {
    fn handle(&self, delta: O) -> impl Future<Output = SyncResult<MergeOutcome>> + Send {
        (**self).handle(delta)
    }
}

/// A fetcher that replays queued responses, for testing.
///
/// Once the queue is drained every fetch fails.
#[derive(Debug)]
pub struct ScriptedFetcher<O> {
    script: Mutex<VecDeque<Result<O, String>>>,
    requests: Mutex<Vec<Watermark>>,
}

impl<O> ScriptedFetcher<O> {
    /// Creates a fetcher with an empty script.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful response.
    pub fn push_response(&self, response: O) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(message.into()));
    }

    /// Returns the watermark of every fetch so far, in call order.
    pub fn requests(&self) -> Vec<Watermark> {
        self.requests.lock().clone()
    }

    /// Returns how many fetches have been made.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns how many queued entries are left.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl<O> Default for ScriptedFetcher<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Send> DeltaFetcher<O> for ScriptedFetcher<O> {
    async fn fetch(&self, target: &mut O, updated_after: Watermark) -> Result<(), FetchError> {
        self.requests.lock().push(updated_after);
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(response)) => {
                *target = response;
                Ok(())
            }
            Some(Err(message)) => Err(message.into()),
            None => Err("no scripted response left".into()),
        }
    }
}

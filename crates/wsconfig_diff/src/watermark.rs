//! The incremental fetch cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The latest modification timestamp merged so far.
///
/// The zero watermark asks the server for the full dataset. Ordering puts
/// zero before every real timestamp, so `max` never regresses to zero.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Watermark(Option<DateTime<Utc>>);

impl Watermark {
    /// The zero watermark: nothing merged yet.
    pub const ZERO: Watermark = Watermark(None);

    /// Creates a watermark at the given timestamp.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self(Some(timestamp))
    }

    /// Returns true if no timestamp has been recorded.
    pub fn is_zero(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the timestamp, if any.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    /// Moves the watermark forward to `timestamp` if it is later.
    ///
    /// Returns true if the watermark moved.
    pub fn advance(&mut self, timestamp: DateTime<Utc>) -> bool {
        let candidate = Watermark::at(timestamp);
        if candidate > *self {
            *self = candidate;
            true
        } else {
            false
        }
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(timestamp: DateTime<Utc>) -> Self {
        Self::at(timestamp)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ts) => write!(f, "{}", ts.to_rfc3339()),
            None => write!(f, "zero"),
        }
    }
}

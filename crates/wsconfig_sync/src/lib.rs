//! # wsconfig sync
//!
//! Keeps a local copy of workspace configurations in sync with a remote
//! source by polling for incremental updates.
//!
//! This crate provides:
//! - `Poller` for interval polling with exponential backoff
//! - `ConfigCache` for snapshot reads and ordered change notifications
//! - `ConfigSync`, a handle running both on a Tokio task
//! - `DeltaFetcher` / `DeltaHandler`, the seams to the network and the cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use wsconfig_sync::{ConfigSync, SyncOptions};
//!
//! let mut sync = ConfigSync::start(fetcher, SyncOptions::default())?;
//! let mut updates = sync.subscribe();
//!
//! while let Some(notification) = updates.recv().await {
//!     let configs = sync.get();
//!     // apply configs...
//! }
//!
//! sync.close(Duration::from_secs(5)).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod cache;
mod config;
mod error;
mod fetcher;
mod poller;
mod service;

pub use backoff::ExponentialBackoff;
pub use cache::{ConfigCache, Notification, Subscription};
pub use config::{BackoffConfig, PollerConfig, SyncOptions};
pub use error::{FetchError, SyncError, SyncResult};
pub use fetcher::{DeltaFetcher, DeltaHandler, ScriptedFetcher};
pub use poller::{Poller, PollerState, PollerStats, ResponseObserver};
pub use service::ConfigSync;

//! # wsconfig model
//!
//! Typed workspace configurations, ready to be reconciled by `wsconfig_diff`.
//!
//! A response maps workspace ids to workspace configurations and carries the
//! source and destination definitions shared by all workspaces. In an
//! incremental response a workspace that has not changed since the requested
//! watermark is `null`, which decodes to [`DeltaEntry::Unchanged`].
//!
//! [`DeltaEntry::Unchanged`]: wsconfig_diff::DeltaEntry::Unchanged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod workspace;

pub use error::{ModelError, ModelResult};
pub use workspace::{
    Connection, Destination, DestinationDefinition, Source, SourceDefinition, WorkspaceConfig,
    WorkspaceConfigs,
};

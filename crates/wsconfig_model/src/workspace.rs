//! Workspace configuration types.

use crate::error::ModelResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use wsconfig_diff::{
    DefinitionMap, KeyedList, NonUpdateableCollection, UpdateableCollection, UpdateableElement,
    UpdateableObject,
};

/// Configurations of one or more workspaces plus shared definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfigs {
    /// Workspace configurations keyed by workspace id.
    #[serde(default)]
    pub workspaces: KeyedList<String, WorkspaceConfig>,
    /// Source definitions keyed by definition name.
    #[serde(default)]
    pub source_definitions: DefinitionMap<String, SourceDefinition>,
    /// Destination definitions keyed by definition name.
    #[serde(default)]
    pub destination_definitions: DefinitionMap<String, DestinationDefinition>,
}

impl WorkspaceConfigs {
    /// Creates an empty set of configurations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a response body.
    pub fn from_json(body: &[u8]) -> ModelResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Decodes a response body into `self`, replacing its contents.
    pub fn decode_into(&mut self, body: &[u8]) -> ModelResult<()> {
        *self = Self::from_json(body)?;
        Ok(())
    }

    /// Encodes the configurations, unchanged workspaces as `null`.
    pub fn to_json(&self) -> ModelResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns a workspace configuration, if present and not the unchanged marker.
    pub fn workspace(&self, id: &str) -> Option<&WorkspaceConfig> {
        self.workspaces.updated(&id.to_string())
    }

    /// Returns the workspace ids, sorted.
    pub fn workspace_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workspaces.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl UpdateableObject for WorkspaceConfigs {
    fn updateables(&self) -> Vec<&dyn UpdateableCollection> {
        vec![&self.workspaces as &dyn UpdateableCollection]
    }

    fn updateables_mut(&mut self) -> Vec<&mut dyn UpdateableCollection> {
        vec![&mut self.workspaces as &mut dyn UpdateableCollection]
    }

    fn non_updateables(&self) -> Vec<&dyn NonUpdateableCollection> {
        vec![
            &self.source_definitions as &dyn NonUpdateableCollection,
            &self.destination_definitions as &dyn NonUpdateableCollection,
        ]
    }

    fn non_updateables_mut(&mut self) -> Vec<&mut dyn NonUpdateableCollection> {
        vec![
            &mut self.source_definitions as &mut dyn NonUpdateableCollection,
            &mut self.destination_definitions as &mut dyn NonUpdateableCollection,
        ]
    }
}

/// Configuration of a single workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Sources keyed by source id.
    #[serde(default)]
    pub sources: HashMap<String, Source>,
    /// Destinations keyed by destination id.
    #[serde(default)]
    pub destinations: HashMap<String, Destination>,
    /// Connections keyed by connection id.
    #[serde(default)]
    pub connections: HashMap<String, Connection>,
    /// Last modification time of anything in the workspace.
    pub updated_at: DateTime<Utc>,
}

impl UpdateableElement for WorkspaceConfig {
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// An event source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    /// Display name.
    pub name: String,
    /// Key used to authenticate incoming events.
    pub write_key: String,
    /// Whether the source accepts events.
    pub enabled: bool,
    /// Whether the source has been deleted.
    pub deleted: bool,
    /// Name of the source definition.
    #[serde(rename = "sourceDefinitionName")]
    pub definition_name: String,
    /// Definition-specific settings.
    pub config: Value,
}

/// An event destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Destination {
    /// Display name.
    pub name: String,
    /// Whether the destination receives events.
    pub enabled: bool,
    /// Whether the destination has been deleted.
    pub deleted: bool,
    /// Name of the destination definition.
    #[serde(rename = "destinationDefinitionName")]
    pub definition_name: String,
    /// Definition-specific settings.
    pub config: Value,
}

/// A source to destination link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Connection {
    /// Source id.
    pub source_id: String,
    /// Destination id.
    pub destination_id: String,
    /// Whether the connection is active.
    pub enabled: bool,
    /// Whether events are processed before delivery.
    pub processor_enabled: bool,
}

/// Shared definition of a source type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceDefinition {
    /// Definition name.
    pub name: String,
    /// Human readable name.
    pub display_name: String,
    /// Category.
    pub category: String,
    /// Definition options.
    pub options: Value,
}

/// Shared definition of a destination type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinationDefinition {
    /// Definition name.
    pub name: String,
    /// Human readable name.
    pub display_name: String,
    /// Category.
    pub category: String,
    /// Definition options.
    pub options: Value,
}

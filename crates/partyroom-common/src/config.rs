//! Configuration structures for partyroom.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`RoomConfig`]: Per-room connection settings (id parameter, tag limits)
//! - [`EdgeConfig`]: Edge routing settings (main party, static assets)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options shared by every room
/// runtime and the edge router. It can be loaded from TOML or JSON.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Room runtime configuration.
    #[serde(default)]
    pub room: RoomConfig,

    /// Edge router configuration.
    #[serde(default)]
    pub edge: EdgeConfig,

    /// Variables exposed to user code as the room environment.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

/// Room runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomConfig {
    /// Query parameter carrying the client-chosen connection id.
    #[serde(default = "defaults::connection_id_param")]
    pub connection_id_param: String,

    /// Maximum number of tags per connection, including the id tag.
    #[serde(default = "defaults::max_connection_tags")]
    pub max_connection_tags: usize,

    /// Maximum length of a single tag in bytes.
    #[serde(default = "defaults::max_tag_length")]
    pub max_tag_length: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            connection_id_param: defaults::connection_id_param(),
            max_connection_tags: defaults::max_connection_tags(),
            max_tag_length: defaults::max_tag_length(),
        }
    }
}

/// Edge router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeConfig {
    /// Party addressed by the short `/party/:room` form.
    ///
    /// Its `on_fetch` hook is also the catch-all for unmatched paths.
    #[serde(default = "defaults::main_party")]
    pub main_party: String,

    /// Directory served for paths that do not address a room.
    #[serde(default)]
    pub assets_dir: Option<String>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            main_party: defaults::main_party(),
            assets_dir: None,
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub fn connection_id_param() -> String {
        "_pk".to_string()
    }

    pub const fn max_connection_tags() -> usize {
        10
    }

    pub const fn max_tag_length() -> usize {
        256
    }

    pub fn main_party() -> String {
        "main".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert_eq!(config.room.connection_id_param, "_pk");
        assert_eq!(config.room.max_connection_tags, 10);
        assert_eq!(config.room.max_tag_length, 256);
        assert_eq!(config.edge.main_party, "main");
        assert!(config.edge.assets_dir.is_none());
        assert!(config.vars.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = RuntimeConfig::default();
        config.vars.insert("API_KEY".into(), "abc".into());

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.vars.get("API_KEY").map(String::as_str), Some("abc"));
        assert_eq!(
            config.room.max_connection_tags,
            deserialized.room.max_connection_tags
        );
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"edge": {"main_party": "lobby"}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set value
        assert_eq!(config.edge.main_party, "lobby");
        // Default values for unspecified fields
        assert_eq!(config.room.connection_id_param, "_pk");
        assert_eq!(config.room.max_tag_length, 256);
    }
}

//! Configuration for reader workspaces and the batch backend.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{NrtError, Result};

/// Property key for [`WorkspaceConfig::apply_deletions`].
pub const APPLY_DELETIONS_KEY: &str = "nrt.apply_deletions";
/// Property key for [`WorkspaceConfig::commit_interval`].
pub const COMMIT_INTERVAL_KEY: &str = "nrt.commit_interval";
/// Property key for [`WorkspaceConfig::queue_capacity`].
pub const QUEUE_CAPACITY_KEY: &str = "backend.queue_capacity";

/// Settings bundle passed to a workspace at construction.
///
/// Only the typed knobs are interpreted; `properties` is carried through
/// untouched for collaborators that need it.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use sarissa_nrt::workspace::config::WorkspaceConfig;
///
/// let props = HashMap::from([
///     ("nrt.commit_interval".to_string(), "10".to_string()),
///     ("custom.flag".to_string(), "on".to_string()),
/// ]);
/// let config = WorkspaceConfig::from_properties(props).unwrap();
/// assert_eq!(config.commit_interval, 10);
/// assert!(config.apply_deletions);
/// assert_eq!(config.property("custom.flag"), Some("on"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Resolve buffered deletes when refreshing the reference reader.
    pub apply_deletions: bool,

    /// Commit every N applied batches; `0` never commits automatically.
    pub commit_interval: u32,

    /// Capacity of the backend batch queue.
    pub queue_capacity: usize,

    /// Opaque pass-through settings.
    pub properties: HashMap<String, String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        WorkspaceConfig {
            apply_deletions: true,
            commit_interval: 0,
            queue_capacity: 64,
            properties: HashMap::new(),
        }
    }
}

impl WorkspaceConfig {
    /// Build a configuration from a flat properties bundle.
    pub fn from_properties(properties: HashMap<String, String>) -> Result<Self> {
        let mut config = WorkspaceConfig::default();

        if let Some(value) = properties.get(APPLY_DELETIONS_KEY) {
            config.apply_deletions = parse_property(APPLY_DELETIONS_KEY, value)?;
        }
        if let Some(value) = properties.get(COMMIT_INTERVAL_KEY) {
            config.commit_interval = parse_property(COMMIT_INTERVAL_KEY, value)?;
        }
        if let Some(value) = properties.get(QUEUE_CAPACITY_KEY) {
            config.queue_capacity = parse_property(QUEUE_CAPACITY_KEY, value)?;
        }

        config.properties = properties;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: WorkspaceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a pass-through property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(NrtError::invalid_config(format!(
                "{QUEUE_CAPACITY_KEY} must be greater than zero"
            )));
        }
        Ok(())
    }
}

fn parse_property<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| NrtError::invalid_config(format!("{key}: invalid value '{value}'")))
}

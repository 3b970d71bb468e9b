use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::StartupError;

/// Resolved, validated settings a node starts with. Built by merging, in
/// increasing precedence: built-in defaults, an on-disk JSON config file,
/// environment variables, then CLI flags (applied by the caller after
/// `NodeConfig::load` returns).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Comma-separated list of `wss://` coordinator endpoints, tried in order.
    pub coordinator_url: String,
    pub data_dir: String,
    pub node_id: String,
    pub max_ram_gb: u64,
    pub embedding_dim: usize,
    pub index_version: u32,
    pub secret: String,
    pub sui_address: String,
    pub sui_signature: Option<String>,
    pub referral_code: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            coordinator_url: String::new(),
            data_dir: "./data".to_string(),
            node_id: String::new(),
            max_ram_gb: 4,
            embedding_dim: 384,
            index_version: 1,
            secret: String::new(),
            sui_address: String::new(),
            sui_signature: None,
            referral_code: None,
        }
    }
}

impl NodeConfig {
    /// Loads defaults, overlays an on-disk JSON config file if present, then
    /// overlays environment variables. A missing or malformed config file is
    /// not fatal on its own; `validate` catches unrecoverable combinations.
    pub fn load(config_path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        config.apply_env_overrides();

        if config.node_id.is_empty() {
            config.node_id = uuid::Uuid::new_v4().to_string();
        }

        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WORKER_COORDINATOR_URL") {
            self.coordinator_url = v;
        }
        if let Ok(v) = std::env::var("WORKER_DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = std::env::var("WORKER_NODE_ID") {
            self.node_id = v;
        }
        if let Ok(v) = std::env::var("WORKER_MAX_RAM_GB") {
            if let Ok(parsed) = v.parse() {
                self.max_ram_gb = parsed;
            }
        }
        if let Ok(v) = std::env::var("WORKER_EMBEDDING_DIM") {
            if let Ok(parsed) = v.parse() {
                self.embedding_dim = parsed;
            }
        }
        if let Ok(v) = std::env::var("WORKER_INDEX_VERSION") {
            if let Ok(parsed) = v.parse() {
                self.index_version = parsed;
            }
        }
        if let Ok(v) = std::env::var("WORKER_SECRET") {
            self.secret = v;
        }
        if let Ok(v) = std::env::var("WORKER_SUI_ADDRESS") {
            self.sui_address = v;
        }
        if let Ok(v) = std::env::var("WORKER_SUI_SIGNATURE") {
            self.sui_signature = Some(v);
        }
        if let Ok(v) = std::env::var("WORKER_REFERRAL_CODE") {
            self.referral_code = Some(v);
        }
    }

    /// Returns the coordinator endpoints in order, ignoring blank entries.
    pub fn coordinator_urls(&self) -> Vec<String> {
        self.coordinator_url
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Unrecoverable configuration aborts the process before the RAM
    /// reservation and session state machine start.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.sui_address.is_empty() {
            return Err(StartupError::InvalidConfig(
                "sui_address is required".to_string(),
            ));
        }
        if self.coordinator_urls().is_empty() {
            return Err(StartupError::InvalidConfig(
                "coordinator_url must contain at least one endpoint".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(StartupError::InvalidConfig(
                "embedding_dim must be > 0".to_string(),
            ));
        }
        if self.max_ram_gb == 0 {
            return Err(StartupError::InvalidConfig(
                "max_ram_gb must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_missing_sui_address() {
        let config = NodeConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn coordinator_urls_splits_and_trims() {
        let mut config = NodeConfig::default();
        config.coordinator_url = " wss://a.example, wss://b.example ,".to_string();
        assert_eq!(
            config.coordinator_urls(),
            vec!["wss://a.example".to_string(), "wss://b.example".to_string()]
        );
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults_plus_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = NodeConfig::load(&path);
        assert!(!config.node_id.is_empty());
        assert_eq!(config.max_ram_gb, 4);
    }
}

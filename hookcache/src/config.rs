use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::AccessMode;

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name shown in log lines
    pub name: String,
    /// Joins prefix parts and keys
    pub separator: String,
    /// Namespace every key starts with
    pub prefix: String,
    /// Default TTL for writes; 0 disables expiry
    pub default_ttl_ms: u64,
    pub mode: AccessMode,
    /// Per-operation timing lines at debug level
    pub log: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            separator: ":".to_string(),
            prefix: String::new(),
            default_ttl_ms: 300_000,
            mode: AccessMode::ReadWrite,
            log: false,
        }
    }
}

impl CacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

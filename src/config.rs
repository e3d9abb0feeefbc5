//! Configuration management for ratelimit-sync.

use serde::{Deserialize, Serialize};

/// Prefix of environment variables overriding file configuration.
pub const ENV_PREFIX: &str = "RLSYNC";

/// Main configuration for the synchronization service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Snapshot naming and distribution
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Rule store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Naming of the published rate limit config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Name of the rate limit config resource
    #[serde(default = "default_config_name")]
    pub name: String,

    /// Rate limit domain proxies match against
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Node key the snapshot is published under
    #[serde(default = "default_node_key")]
    pub node_key: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            name: default_config_name(),
            domain: default_domain(),
            node_key: default_node_key(),
        }
    }
}

fn default_config_name() -> String {
    "demo".to_string()
}

fn default_domain() -> String {
    "ratelimit".to_string()
}

fn default_node_key() -> String {
    "test-node".to_string()
}

/// Rule store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to a YAML seed of callers and rules
    pub seed_path: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SyncConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| crate::error::SyncError::Config(e.to_string()))
    }

    /// Load configuration from an optional file, overridden by environment
    /// variables such as `RLSYNC__SNAPSHOT__NODE_KEY`.
    pub fn load(path: Option<&str>) -> crate::error::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(std::path::Path::new(path)));
        }
        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::error::SyncError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.snapshot.name, "demo");
        assert_eq!(config.snapshot.domain, "ratelimit");
        assert_eq!(config.snapshot.node_key, "test-node");
        assert!(config.store.seed_path.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
snapshot:
  node_key: edge-proxies
store:
  seed_path: /etc/ratelimit/seed.yaml
"#;
        let config = SyncConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.snapshot.node_key, "edge-proxies");
        assert_eq!(config.snapshot.domain, "ratelimit");
        assert_eq!(config.store.seed_path.as_deref(), Some("/etc/ratelimit/seed.yaml"));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = SyncConfig::from_yaml("snapshot: [1, 2]").unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Config(_)));
    }

    #[test]
    fn test_load_without_file() {
        let config = SyncConfig::load(None).unwrap();
        assert!(!config.snapshot.name.is_empty());
    }
}

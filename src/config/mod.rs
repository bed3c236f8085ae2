use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;
use log::info;

mod migration;
mod node;
mod storage;

pub use migration::{HasherKind, MigrationConfig};
pub use node::NodeConfig;
pub use storage::StorageConfig;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this structure
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The structure could not be rendered as TOML
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Main configuration for the migrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Migration configuration
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let config_str = toml::to_string_pretty(self)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.migration.validate()
    }

    /// Generate a default configuration file if it doesn't exist
    pub fn generate_default<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if path.exists() {
            info!("Config file already exists at {:?}", path);
            return Ok(());
        }

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        Config::default().save(path)?;

        info!("Generated default config at {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("migrator.toml");

        let mut config = Config::default();
        config.migration.num_account_workers = 3;
        config.migration.hasher = HasherKind::Keccak;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.migration.num_account_workers, 3);
        assert_eq!(loaded.migration.hasher, HasherKind::Keccak);
        assert_eq!(loaded.storage.compression_type, config.storage.compression_type);
    }

    #[test]
    fn test_generate_default_keeps_existing() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("conf").join("migrator.toml");

        Config::generate_default(&path).unwrap();
        assert!(path.exists());

        let mut config = Config::load(&path).unwrap();
        config.node.log_level = "debug".to_string();
        config.save(&path).unwrap();

        // A second call must not overwrite the edited file
        Config::generate_default(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap().node.log_level, "debug");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[migration]\nmax_levels = 64\n").unwrap();
        assert_eq!(config.migration.max_levels, 64);
        assert_eq!(config.migration.catch_up_interval_ms, 1000);
        assert_eq!(config.node.log_level, "info");
    }

    #[test]
    fn test_rejects_oversized_tree() {
        let mut config = Config::default();
        config.migration.max_levels = 300;
        assert!(config.validate().is_err());
    }
}

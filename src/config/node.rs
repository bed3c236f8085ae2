use serde::{Serialize, Deserialize};
use std::path::PathBuf;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Data directory holding the shared key-value store
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Genesis allocation file, used as a fallback preimage source
    pub genesis_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/zkt-migrator"),
            log_level: "info".to_string(),
            genesis_path: None,
        }
    }
}

use serde::{Serialize, Deserialize};

use super::ConfigError;

/// Hash function used by the ZK trie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    /// SNARK-friendly Poseidon permutation
    Poseidon,
    /// Keccak256 substitute, only meant for tests and tooling
    Keccak,
}

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Parallel range workers for the account trie scan
    pub num_account_workers: usize,

    /// Parallel range workers for each storage trie scan
    pub num_storage_workers: usize,

    /// Parallel range workers used by full validation
    pub validation_workers: usize,

    /// Interval of the catch-up loop in milliseconds
    pub catch_up_interval_ms: u64,

    /// Interval of the progress log in seconds
    pub progress_interval_secs: u64,

    /// Poll interval while waiting for a safe block in milliseconds
    pub safe_block_poll_ms: u64,

    /// ZK trie hash function
    pub hasher: HasherKind,

    /// Maximum depth of the ZK trie
    pub max_levels: usize,

    /// Validate every caught-up block against the next ZK root
    pub validate_incremental: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            num_account_workers: num_cpus::get(),
            num_storage_workers: num_cpus::get(),
            validation_workers: 16,
            catch_up_interval_ms: 1000,
            progress_interval_secs: 60,
            safe_block_poll_ms: 1000,
            hasher: HasherKind::Poseidon,
            max_levels: 248,
            validate_incremental: true,
        }
    }
}

impl MigrationConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_levels == 0 || self.max_levels > 256 {
            return Err(ConfigError::Invalid(format!(
                "max_levels must be in 1..=256, got {}",
                self.max_levels
            )));
        }
        if self.num_account_workers == 0 || self.num_storage_workers == 0 || self.validation_workers == 0 {
            return Err(ConfigError::Invalid("worker counts must be positive".to_string()));
        }
        Ok(())
    }
}

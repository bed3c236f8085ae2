//! The block-processing side the migrator follows.

pub mod genesis;

pub use genesis::{GenesisAccount, GenesisConfig};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::storage::block_store::Hash;

/// Error type for chain access
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Header missing from the chain database
    #[error("Header {0} not found")]
    HeaderNotFound(u64),

    /// Genesis configuration could not be read or applied
    #[error("Genesis error: {0}")]
    Genesis(String),

    /// Backend failure
    #[error("Chain backend error: {0}")]
    Backend(String),
}

/// Result alias for chain access
pub type ChainResult<T> = Result<T, ChainError>;

/// The parts of a block header the migrator reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    /// State root, big-endian
    pub root: Hash,
    pub time: u64,
}

/// Immutable chain configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Incremented on every replacement
    pub version: u64,
    /// Timestamp from which blocks use the MPT
    pub mpt_time: Option<u64>,
    /// Whether the block engine writes the ZK trie
    pub zktrie: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            version: 0,
            mpt_time: None,
            zktrie: true,
        }
    }
}

impl ChainConfig {
    /// Whether a block with timestamp `time` is processed with the MPT
    pub fn is_mpt(&self, time: u64) -> bool {
        self.mpt_time.map_or(false, |t| time >= t)
    }

    /// Next version of this config with the MPT active from `time`
    pub fn with_mpt_time(&self, time: u64) -> ChainConfig {
        ChainConfig {
            version: self.version + 1,
            mpt_time: Some(time),
            zktrie: false,
        }
    }
}

/// Read access to the chain plus the configuration switch
pub trait ChainBackend: Send + Sync {
    /// Latest block that can no longer be reorganised
    fn safe_block(&self) -> ChainResult<Option<BlockHeader>>;

    /// Header of a canonical block
    fn header_by_number(&self, number: u64) -> ChainResult<Option<BlockHeader>>;

    /// Snapshot of the active configuration
    fn chain_config(&self) -> Arc<ChainConfig>;

    /// Atomically replace the active configuration, returning the old one
    fn swap_chain_config(&self, config: ChainConfig) -> ChainResult<Arc<ChainConfig>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpt_activation() {
        let config = ChainConfig::default();
        assert!(!config.is_mpt(u64::MAX));

        let next = config.with_mpt_time(100);
        assert_eq!(next.version, 1);
        assert!(!next.zktrie);
        assert!(!next.is_mpt(99));
        assert!(next.is_mpt(100));
    }
}

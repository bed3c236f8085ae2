//! ZK trie to MPT state migration.
//!
//! The migrator copies the full ZK state of a safe block into an MPT once,
//! then follows the chain block by block using the recorded state diffs,
//! validating every step against the ZK roots the chain committed to.
//! Progress is checkpointed in [`MigratedRef`](crate::storage::MigratedRef).

mod bulk;
mod catchup;
mod commit;
pub mod migrator;
mod preimage;
pub mod progress;
pub mod range;
mod validate;

pub use migrator::StateMigrator;
pub use preimage::PreimageResolver;
pub use progress::Progress;
pub use range::{hash_range_iterator, split_ranges, HashRange};

use std::fmt;

use crate::chain::ChainError;
use crate::state::StateError;
use crate::storage::block_store::Hash;
use crate::storage::kv_store::KVStoreError;
use crate::trie::TrieError;
use crate::zk::{ZkHash, ZkTrieError};

/// Error type for the migration pipeline
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A tree key whose natural key is unknown
    #[error("Preimage missing for {0}")]
    PreimageMissing(ZkHash),

    /// The two representations disagree
    #[error("Validation mismatch at {context}: expected {expected}, got {actual}")]
    ValidationMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// A new MPT node hash already names a ZK node
    #[error("Hash collision detected on {}: path {path}", hex::encode(.hash))]
    HashCollision { hash: Hash, path: String },

    /// The migration was stopped
    #[error("Migration cancelled")]
    Cancelled,

    /// The chain has already switched to the MPT
    #[error("State has already been transitioned to MPT")]
    AlreadyTransitioned,

    /// A block this step needs is missing
    #[error("Block {0} not found")]
    BlockNotFound(u64),

    /// The state diff of a block is missing
    #[error("State changes of block {0} not found")]
    StateChangesNotFound(u64),

    /// A blocking migration task panicked or was aborted
    #[error("Migration task failed: {0}")]
    Task(String),

    #[error("ZK trie error: {0}")]
    ZkTrie(#[from] ZkTrieError),

    #[error("Trie error: {0}")]
    Trie(#[from] TrieError),

    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),

    #[error("Account error: {0}")]
    State(#[from] StateError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}

impl MigrationError {
    /// Whether the error leaves the migration in a state the node must not
    /// build on
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MigrationError::Cancelled
                | MigrationError::AlreadyTransitioned
                | MigrationError::BlockNotFound(_)
                | MigrationError::StateChangesNotFound(_)
        )
    }

    pub(crate) fn mismatch(context: impl Into<String>, expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        MigrationError::ValidationMismatch {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result alias for the migration pipeline
pub type MigrationResult<T> = Result<T, MigrationError>;

/// What a validation pass compares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Every account and slot of a full state
    Bulk,
    /// The diff of a single block
    Incremental,
}

/// Lifecycle of the migrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    BulkMigrating,
    Validating(ValidationKind),
    CatchingUp,
    Finalizing,
    Done,
    /// A fatal error stopped the migration
    Halted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NotStarted => write!(f, "not started"),
            Phase::BulkMigrating => write!(f, "bulk migrating"),
            Phase::Validating(ValidationKind::Bulk) => write!(f, "validating (bulk)"),
            Phase::Validating(ValidationKind::Incremental) => write!(f, "validating (incremental)"),
            Phase::CatchingUp => write!(f, "catching up"),
            Phase::Finalizing => write!(f, "finalizing"),
            Phase::Done => write!(f, "done"),
            Phase::Halted => write!(f, "halted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(MigrationError::PreimageMissing(ZkHash::ZERO).is_fatal());
        assert!(MigrationError::mismatch("account 0x01 balance", 1, 2).is_fatal());
        assert!(MigrationError::HashCollision { hash: [0u8; 32], path: String::new() }.is_fatal());
        assert!(!MigrationError::Cancelled.is_fatal());
        assert!(!MigrationError::BlockNotFound(3).is_fatal());
    }
}

//! Ethereum-compatible Merkle Patricia Trie.
//!
//! This is the destination representation of the migration: a hexary trie
//! over keccak256 with RLP node encoding, hex-prefix path compaction and
//! inline embedding of nodes shorter than 32 bytes.

pub mod database;
pub mod encode;
pub mod mpt;
pub mod node;
pub mod rlp;
pub mod secure;

pub use database::{MptDatabase, NodeSet};
pub use mpt::MerklePatriciaTrie;
pub use node::Node;
pub use secure::SecureTrie;

use alloy_trie::EMPTY_ROOT_HASH;
use sha3::{Digest, Keccak256};

use crate::storage::block_store::Hash;
use crate::storage::kv_store::KVStoreError;

/// Root of the empty trie, keccak256 of the RLP empty string
pub const EMPTY_ROOT: Hash = EMPTY_ROOT_HASH.0;

/// Error type for MPT operations
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    /// A referenced node is not in the database
    #[error("Missing trie node {}", hex::encode(.0))]
    MissingNode(Hash),

    /// Malformed RLP
    #[error("RLP decoding error: {0}")]
    Rlp(#[from] alloy_rlp::Error),

    /// RLP that does not describe a trie node
    #[error("Invalid trie node: {0}")]
    InvalidNode(String),

    /// Store failure
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),
}

/// Result alias for MPT operations
pub type TrieResult<T> = Result<T, TrieError>;

/// keccak256 of `data`
pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

//! Sparse binary Merkle tree ("ZK trie") engine.

pub mod database;
pub mod hash;
pub mod hasher;
pub mod iterator;
pub mod node;
pub mod poseidon;
pub mod proof;
pub mod state_trie;
pub mod tree;
pub mod tree_path;

pub use database::{NodeReader, ZkTrieDatabase};
pub use hash::{Byte32, ZkHash};
pub use hasher::{new_hasher, HashError, Hasher, KeccakHasher, PoseidonHasher, SharedHasher};
pub use iterator::LeafIterator;
pub use node::{LeafNode, NodeRef, ParentNode, TreeNode};
pub use proof::{verify_proof, NodeAux, Proof};
pub use state_trie::ZkStateTrie;
pub use tree::MerkleTree;
pub use tree_path::{hash_to_iterator_key, iterator_key_to_hash, TreePath};

use crate::storage::kv_store::KVStoreError;

/// Default maximum depth of a tree
pub const DEFAULT_MAX_LEVELS: usize = 248;

/// Error type for ZK trie operations
#[derive(Debug, thiserror::Error)]
pub enum ZkTrieError {
    /// Key is not in the tree
    #[error("Key not found in the trie")]
    KeyNotFound,

    /// Node with the given hash is not in the store
    #[error("Node not found: {0}")]
    NodeNotFound(ZkHash),

    /// Two keys share every path bit up to the maximum depth
    #[error("Reached maximum level of the merkle tree")]
    ReachedMaxLevel,

    /// A hash placeholder reached a code path that needs a resolved node
    #[error("Unresolved hash node at level {0}")]
    UnresolvedHashNode(usize),

    /// Node blob is shorter than its header announces
    #[error("Node bytes have bad size: {0}")]
    NodeBytesBadSize(usize),

    /// Unknown node tag
    #[error("Invalid node type: {0}")]
    InvalidNodeType(u8),

    /// Node encoding needs a child hash that has not been computed
    #[error("Node hash has not been computed")]
    HashNotComputed,

    /// Value length is not one of the supported layouts
    #[error("Unexpected value length: {0}")]
    UnexpectedValueLength(usize),

    /// Leaf value longer than the one-byte word count allows
    #[error("Leaf value has {0} words, at most 255 fit")]
    TooManyValueWords(usize),

    /// Proof does not lead to the claimed root
    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    /// Hash computation failed
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    /// Store failure
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),
}

/// Result alias for ZK trie operations
pub type ZkTrieResult<T> = Result<T, ZkTrieError>;

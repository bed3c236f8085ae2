use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

use super::hash::ZkHash;
use super::hasher::SharedHasher;
use super::ZkTrieResult;
use crate::storage::kv_store::{KVStore, WriteBatchOperation, WriteBatchOperationExt};
use crate::storage::schema::Schema;

/// Source of encoded nodes by digest
pub trait NodeReader: Send + Sync {
    /// Encoded node stored under `hash`, if any
    fn node_blob(&self, hash: &ZkHash) -> ZkTrieResult<Option<Vec<u8>>>;
}

/// Proof databases are plain digest-to-node maps
impl NodeReader for HashMap<ZkHash, Vec<u8>> {
    fn node_blob(&self, hash: &ZkHash) -> ZkTrieResult<Option<Vec<u8>>> {
        Ok(self.get(hash).cloned())
    }
}

/// ZK trie nodes and secure-key preimages on top of the shared store
pub struct ZkTrieDatabase {
    store: Arc<dyn KVStore>,
    hasher: SharedHasher,
}

impl ZkTrieDatabase {
    /// Create a new database over `store`
    pub fn new(store: Arc<dyn KVStore>, hasher: SharedHasher) -> Self {
        Self { store, hasher }
    }

    /// The hasher trees of this database use
    pub fn hasher(&self) -> &SharedHasher {
        &self.hasher
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn KVStore> {
        &self.store
    }

    /// Read the natural key behind a secure key.
    ///
    /// A stored preimage is only returned if it hashes back to `hash`.
    pub fn preimage(&self, hash: &ZkHash) -> ZkTrieResult<Option<Vec<u8>>> {
        let preimage = match self.store.get(&Schema::preimage_key(hash))? {
            Some(p) => p,
            None => return Ok(None),
        };
        if self.hasher.secure_key(&preimage)? != *hash {
            warn!("Ignoring preimage that does not hash to {}", hash);
            return Ok(None);
        }
        Ok(Some(preimage))
    }

    /// Batch operations writing encoded nodes
    pub fn node_ops(nodes: &[(ZkHash, Vec<u8>)]) -> Vec<WriteBatchOperation> {
        let mut ops = WriteBatchOperation::new();
        for (hash, blob) in nodes {
            ops.put(Schema::zk_node_key(hash), blob.clone());
        }
        ops
    }

    /// Batch operations writing preimages
    pub fn preimage_ops(preimages: &HashMap<ZkHash, Vec<u8>>) -> Vec<WriteBatchOperation> {
        let mut ops = WriteBatchOperation::new();
        for (hash, preimage) in preimages {
            ops.put(Schema::preimage_key(hash), preimage.clone());
        }
        ops
    }
}

impl NodeReader for ZkTrieDatabase {
    fn node_blob(&self, hash: &ZkHash) -> ZkTrieResult<Option<Vec<u8>>> {
        Ok(self.store.get(&Schema::zk_node_key(hash))?)
    }
}

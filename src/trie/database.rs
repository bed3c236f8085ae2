use dashmap::DashMap;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::encode::Nibble;
use super::TrieResult;
use crate::storage::block_store::Hash;
use crate::storage::kv_store::{KVStore, WriteBatchOperation, WriteBatchOperationExt};
use crate::storage::schema::Schema;

/// A node written by a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedNode {
    pub hash: Hash,
    pub blob: Vec<u8>,
}

/// Nodes produced by committing one trie, keyed by their path
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    /// Account hash of a storage trie, `None` for the account trie
    pub owner: Option<Hash>,
    nodes: BTreeMap<Vec<Nibble>, CommittedNode>,
}

impl NodeSet {
    pub fn new(owner: Option<Hash>) -> Self {
        Self { owner, nodes: BTreeMap::new() }
    }

    pub fn add(&mut self, path: Vec<Nibble>, hash: Hash, blob: Vec<u8>) {
        self.nodes.insert(path, CommittedNode { hash, blob });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<Nibble>, &CommittedNode)> {
        self.nodes.iter()
    }
}

/// MPT node storage with an in-memory overlay of committed but unflushed
/// nodes
pub struct MptDatabase {
    store: Arc<dyn KVStore>,
    dirties: DashMap<Hash, Vec<u8>>,
}

impl MptDatabase {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self {
            store,
            dirties: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KVStore> {
        &self.store
    }

    /// Encoded node stored under `hash`, looking at unflushed nodes first
    pub fn node(&self, hash: &Hash) -> TrieResult<Option<Vec<u8>>> {
        if let Some(blob) = self.dirties.get(hash) {
            return Ok(Some(blob.value().clone()));
        }
        Ok(self.store.get(&Schema::mpt_node_key(hash))?)
    }

    /// Add the nodes of a commit to the overlay
    pub fn update(&self, nodes: &NodeSet) {
        for (_, node) in nodes.iter() {
            self.dirties.insert(node.hash, node.blob.clone());
        }
    }

    /// Number of unflushed nodes
    pub fn dirty_len(&self) -> usize {
        self.dirties.len()
    }

    /// Move the overlay into batch operations
    pub fn flush_ops(&self) -> Vec<WriteBatchOperation> {
        let hashes: Vec<Hash> = self.dirties.iter().map(|entry| *entry.key()).collect();
        let mut ops = WriteBatchOperation::new();
        for hash in hashes {
            if let Some((hash, blob)) = self.dirties.remove(&hash) {
                ops.put(Schema::mpt_node_key(&hash), blob);
            }
        }
        debug!("Flushing {} MPT nodes", ops.len());
        ops
    }

    /// Drop unflushed nodes
    pub fn discard(&self) {
        self.dirties.clear();
    }
}

//! Secure-keyed view of a [`MerkleTree`].
//!
//! Natural keys (addresses, storage slots) are hashed into tree keys with
//! the hasher's secure key function, and the natural key is remembered as a
//! preimage so iteration can recover it later.

use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use super::database::{NodeReader, ZkTrieDatabase};
use super::hash::ZkHash;
use super::iterator::LeafIterator;
use super::node::TreeNode;
use super::tree::MerkleTree;
use super::ZkTrieResult;
use crate::storage::kv_store::WriteBatchOperation;

/// Everything a commit needs to persist
#[derive(Debug, Default)]
pub struct ZkCommit {
    /// New root digest
    pub root: ZkHash,
    /// Newly hashed nodes with their encodings
    pub nodes: Vec<(ZkHash, Vec<u8>)>,
    /// Natural keys of the secure keys touched since the last commit
    pub preimages: HashMap<ZkHash, Vec<u8>>,
}

impl ZkCommit {
    /// Batch operations writing the nodes and preimages
    pub fn to_ops(&self) -> Vec<WriteBatchOperation> {
        let mut ops = ZkTrieDatabase::node_ops(&self.nodes);
        ops.extend(ZkTrieDatabase::preimage_ops(&self.preimages));
        ops
    }
}

/// State trie keyed by natural keys
#[derive(Clone)]
pub struct ZkStateTrie {
    tree: MerkleTree,
    db: Arc<ZkTrieDatabase>,
    preimages: HashMap<ZkHash, Vec<u8>>,
}

impl ZkStateTrie {
    /// Open the trie stored under `root`
    pub fn new(root: ZkHash, db: Arc<ZkTrieDatabase>, max_levels: usize) -> ZkTrieResult<Self> {
        let reader: Arc<dyn NodeReader> = db.clone();
        let tree = MerkleTree::from_root(root, reader, db.hasher().clone())?.with_max_levels(max_levels);
        Ok(Self {
            tree,
            db,
            preimages: HashMap::new(),
        })
    }

    /// The underlying tree
    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    /// The node database
    pub fn database(&self) -> &Arc<ZkTrieDatabase> {
        &self.db
    }

    /// Tree key of a natural key
    pub fn hash_key(&self, key: &[u8]) -> ZkTrieResult<ZkHash> {
        Ok(self.db.hasher().secure_key(key)?)
    }

    /// Value stored under a natural key
    pub fn get(&self, key: &[u8]) -> ZkTrieResult<Option<Vec<u8>>> {
        self.tree.get(&self.hash_key(key)?)
    }

    /// Value stored under a tree key
    pub fn get_by_hash(&self, hash: &ZkHash) -> ZkTrieResult<Option<Vec<u8>>> {
        self.tree.get(hash)
    }

    /// Associate `value` with a natural key
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> ZkTrieResult<()> {
        let hash = self.hash_key(key)?;
        self.tree.update(&hash, value)?;
        self.preimages.insert(hash, key.to_vec());
        Ok(())
    }

    /// Associate `value` with a tree key whose natural key is unknown
    pub fn update_by_hash(&mut self, hash: &ZkHash, value: &[u8]) -> ZkTrieResult<()> {
        self.tree.update(hash, value)
    }

    /// Remove a natural key
    pub fn delete(&mut self, key: &[u8]) -> ZkTrieResult<()> {
        let hash = self.hash_key(key)?;
        self.delete_by_hash(&hash)
    }

    /// Remove a tree key
    pub fn delete_by_hash(&mut self, hash: &ZkHash) -> ZkTrieResult<()> {
        self.tree.delete(hash)
    }

    /// Root digest
    pub fn hash(&self) -> ZkTrieResult<ZkHash> {
        self.tree.hash()
    }

    /// Natural key of a tree key, from this trie's pending writes or the
    /// verified preimage store
    pub fn preimage(&self, hash: &ZkHash) -> ZkTrieResult<Option<Vec<u8>>> {
        if let Some(key) = self.preimages.get(hash) {
            return Ok(Some(key.clone()));
        }
        self.db.preimage(hash)
    }

    /// Hash every dirty node and hand back what has to be persisted
    pub fn commit(&mut self) -> ZkTrieResult<ZkCommit> {
        let mut nodes = Vec::new();
        let root = self.tree.compute_all_hashes(&mut |node| {
            if let Some(hash) = node.cached_hash() {
                nodes.push((hash, node.encode()?));
            }
            Ok(())
        })?;
        debug!("Committed zk trie {} with {} new nodes", root, nodes.len());
        Ok(ZkCommit {
            root,
            nodes,
            preimages: std::mem::take(&mut self.preimages),
        })
    }

    /// Emit the proof nodes for a natural key. The terminal leaf carries its
    /// natural key when it is known.
    pub fn prove(&self, key: &[u8], emit: &mut dyn FnMut(ZkHash, Vec<u8>) -> ZkTrieResult<()>) -> ZkTrieResult<()> {
        let hash = self.hash_key(key)?;
        self.tree.prove(&hash, &mut |node| {
            let digest = match node.cached_hash() {
                Some(digest) if !digest.is_zero() => digest,
                _ => return Ok(()),
            };
            let blob = match node {
                TreeNode::Leaf(leaf) => {
                    let preimage = self.preimage(leaf.key())?;
                    leaf.encode_with_preimage(preimage.as_deref())
                }
                _ => node.encode()?,
            };
            emit(digest, blob)
        })
    }

    /// Iterate over the leaves from iterator key `start`
    pub fn iter_from(&self, start: &[u8; 32]) -> LeafIterator<'_> {
        self.tree.iter_from(start)
    }
}

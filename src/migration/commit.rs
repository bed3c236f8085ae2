use log::{debug, error, warn};

use super::migrator::StateMigrator;
use super::{MigrationError, MigrationResult};
use crate::storage::block_store::Hash;
use crate::storage::kv_store::KVStore;
use crate::storage::schema::Schema;
use crate::trie::encode::format_nibbles;
use crate::trie::{NodeSet, SecureTrie};
use crate::zk::{TreeNode, ZkHash};

impl StateMigrator {
    /// Commit a trie and stage its nodes in the MPT overlay once they pass
    /// the collision check
    pub(crate) fn commit_trie(&self, trie: &mut SecureTrie) -> MigrationResult<Hash> {
        let (root, set) = trie.commit()?;
        if set.is_empty() {
            warn!("Tried to commit state changes, but nothing has changed. root={}", hex::encode(root));
            return Ok(root);
        }
        check_collisions(self.store.as_ref(), &set)?;
        self.mptdb.update(&set);
        debug!("Staged {} MPT nodes for root {}", set.len(), hex::encode(root));
        Ok(root)
    }
}

/// Reject a node set whose hashes alias ZK nodes in the shared store.
///
/// A hash aliases when the slot it would be written to already holds
/// different bytes, or when a ZK node is stored under the same digest.
pub(crate) fn check_collisions(store: &dyn KVStore, set: &NodeSet) -> MigrationResult<()> {
    for (path, node) in set.iter() {
        if let Some(existing) = store.get(&Schema::mpt_node_key(&node.hash))? {
            if existing != node.blob && TreeNode::decode(&existing).is_ok() {
                return Err(collision(&node.hash, path));
            }
        }
        let zk_key = Schema::zk_node_key(&ZkHash::from_be_bytes(&node.hash));
        if let Some(existing) = store.get(&zk_key)? {
            if TreeNode::decode(&existing).is_ok() {
                return Err(collision(&node.hash, path));
            }
        }
    }
    Ok(())
}

fn collision(hash: &Hash, path: &[u8]) -> MigrationError {
    let path = format_nibbles(path);
    error!("Hash collision detected: hash={} path={}", hex::encode(hash), path);
    MigrationError::HashCollision { hash: *hash, path }
}

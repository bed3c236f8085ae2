//! Account and storage tries keyed by keccak256 of the natural key.

use std::sync::Arc;

use super::database::{MptDatabase, NodeSet};
use super::mpt::MerklePatriciaTrie;
use super::rlp;
use super::{keccak256, TrieResult};
use crate::state::{StateAccount, StateResult};
use crate::storage::block_store::Hash;
use crate::zk::hash::trim_left_zeroes;

/// A [`MerklePatriciaTrie`] whose keys are hashed before use
pub struct SecureTrie {
    trie: MerklePatriciaTrie,
    /// keccak256 of the owning address for storage tries
    owner: Option<Hash>,
}

impl SecureTrie {
    /// Open the account trie at `root`
    pub fn new(root: Hash, db: Arc<MptDatabase>) -> Self {
        Self {
            trie: MerklePatriciaTrie::new(root, db),
            owner: None,
        }
    }

    /// Open the storage trie of the account with address hash `owner`
    pub fn new_storage(owner: Hash, root: Hash, db: Arc<MptDatabase>) -> Self {
        Self {
            trie: MerklePatriciaTrie::new(root, db),
            owner: Some(owner),
        }
    }

    pub fn owner(&self) -> Option<Hash> {
        self.owner
    }

    pub fn database(&self) -> &Arc<MptDatabase> {
        self.trie.database()
    }

    /// Account stored for `address`
    pub fn get_account(&self, address: &[u8]) -> StateResult<Option<StateAccount>> {
        match self.trie.get(&keccak256(address))? {
            Some(blob) => Ok(Some(StateAccount::from_rlp(&blob)?)),
            None => Ok(None),
        }
    }

    pub fn update_account(&mut self, address: &[u8], account: &StateAccount) -> StateResult<()> {
        let encoded = account.to_rlp()?;
        Ok(self.trie.insert(&keccak256(address), encoded)?)
    }

    pub fn delete_account(&mut self, address: &[u8]) -> TrieResult<()> {
        self.trie.delete(&keccak256(address))
    }

    /// Value of a storage slot with leading zeroes removed
    pub fn get_storage(&self, slot: &[u8]) -> StateResult<Option<Vec<u8>>> {
        match self.trie.get(&keccak256(slot))? {
            Some(blob) => Ok(Some(rlp::decode_bytes(&blob)?.to_vec())),
            None => Ok(None),
        }
    }

    /// Store a slot value. Leading zeroes are dropped and a value that is
    /// empty or zero deletes the slot.
    pub fn update_storage(&mut self, slot: &[u8], value: &[u8]) -> TrieResult<()> {
        let trimmed = trim_left_zeroes(value);
        if trimmed.is_empty() {
            return self.delete_storage(slot);
        }
        self.trie.insert(&keccak256(slot), rlp::encode_bytes(trimmed))
    }

    pub fn delete_storage(&mut self, slot: &[u8]) -> TrieResult<()> {
        self.trie.delete(&keccak256(slot))
    }

    /// Root hash without committing
    pub fn hash(&mut self) -> TrieResult<Hash> {
        self.trie.hash()
    }

    /// Commit the trie, returning its root and the nodes to store
    pub fn commit(&mut self) -> TrieResult<(Hash, NodeSet)> {
        self.trie.commit(self.owner)
    }

    /// Visit every (hashed key, raw value) pair
    pub fn for_each_leaf(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> TrieResult<()>) -> TrieResult<()> {
        self.trie.for_each_leaf(visit)
    }
}

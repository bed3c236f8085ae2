use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::state::Address;
use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation, WriteBatchOperationExt};
use crate::storage::schema::Schema;
use crate::zk::{Byte32, ZkHash};

/// State diff of one block as recorded by the block engine.
///
/// Accounts and slots are keyed by their ZK secure keys in big-endian
/// form. Account values are ZK account blobs and slot values 32-byte words;
/// an empty value removes the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanges {
    pub destructed: BTreeSet<Address>,
    pub accounts: BTreeMap<Byte32, Vec<u8>>,
    pub storage: BTreeMap<Byte32, BTreeMap<Byte32, Vec<u8>>>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.destructed.is_empty() && self.accounts.is_empty() && self.storage.is_empty()
    }

    /// Record an account write
    pub fn set_account(&mut self, key: &ZkHash, blob: Vec<u8>) {
        self.accounts.insert(key.to_be_bytes(), blob);
    }

    /// Record a slot write for the account with secure key `account`
    pub fn set_slot(&mut self, account: &ZkHash, slot: &ZkHash, value: Vec<u8>) {
        self.storage
            .entry(account.to_be_bytes())
            .or_default()
            .insert(slot.to_be_bytes(), value);
    }

    /// Number of touched slots
    pub fn slot_count(&self) -> usize {
        self.storage.values().map(|slots| slots.len()).sum()
    }
}

/// Per-block state diffs in the shared store
pub struct StateChangesStore {
    store: Arc<dyn KVStore>,
}

impl StateChangesStore {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self { store }
    }

    /// Persist the diff of `block_number` in one batch
    pub fn write(&self, block_number: u64, changes: &StateChanges) -> Result<(), KVStoreError> {
        let mut batch = WriteBatchOperation::new();
        batch.put(Schema::destruct_changes_key(block_number), bincode::serialize(&changes.destructed)?);
        batch.put(Schema::account_changes_key(block_number), bincode::serialize(&changes.accounts)?);
        batch.put(Schema::storage_changes_key(block_number), bincode::serialize(&changes.storage)?);
        self.store.write_batch(batch)?;
        debug!(
            "Recorded state changes of block {}: {} destructed, {} accounts, {} slots",
            block_number,
            changes.destructed.len(),
            changes.accounts.len(),
            changes.slot_count()
        );
        Ok(())
    }

    /// Read the diff of `block_number`, `None` if it was never recorded or
    /// has already been consumed
    pub fn read(&self, block_number: u64) -> Result<Option<StateChanges>, KVStoreError> {
        let destructed = match self.store.get(&Schema::destruct_changes_key(block_number))? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => return Ok(None),
        };
        let accounts = match self.store.get(&Schema::account_changes_key(block_number))? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => return Err(missing_part("account", block_number)),
        };
        let storage = match self.store.get(&Schema::storage_changes_key(block_number))? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => return Err(missing_part("storage", block_number)),
        };
        Ok(Some(StateChanges {
            destructed,
            accounts,
            storage,
        }))
    }

    /// Whether the diff of `block_number` is stored
    pub fn exists(&self, block_number: u64) -> Result<bool, KVStoreError> {
        self.store.exists(&Schema::destruct_changes_key(block_number))
    }

    /// Batch operations deleting the diff of `block_number`
    pub fn delete_ops(block_number: u64) -> Vec<WriteBatchOperation> {
        let mut batch = WriteBatchOperation::new();
        batch.delete(Schema::destruct_changes_key(block_number));
        batch.delete(Schema::account_changes_key(block_number));
        batch.delete(Schema::storage_changes_key(block_number));
        batch
    }

    /// Block numbers that still have a stored diff, ascending
    pub fn pending_blocks(&self) -> Result<Vec<u64>, KVStoreError> {
        let entries = self.store.scan_prefix(Schema::DESTRUCT_CHANGES_PREFIX)?;
        let mut numbers: Vec<u64> = entries
            .iter()
            .filter_map(|(key, _)| Schema::parse_block_number(Schema::DESTRUCT_CHANGES_PREFIX, key))
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }
}

fn missing_part(part: &str, block_number: u64) -> KVStoreError {
    KVStoreError::InvalidDataFormat(format!("{} changes of block {} are missing", part, block_number))
}

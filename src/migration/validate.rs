use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::migrator::StateMigrator;
use super::range::hash_range_iterator;
use super::{MigrationError, MigrationResult};
use crate::chain::BlockHeader;
use crate::state::{Address, StateAccount};
use crate::storage::block_store::Hash;
use crate::storage::StateChanges;
use crate::trie::{keccak256, SecureTrie, TrieResult, EMPTY_ROOT};
use crate::zk::{hash::trim_left_zeroes, ZkHash, ZkStateTrie, ZkTrieError};

fn compare_account(address: &Address, zk: &StateAccount, mpt: &StateAccount) -> MigrationResult<()> {
    let at = |field: &str| format!("account {} {}", hex::encode(address), field);
    if zk.nonce != mpt.nonce {
        return Err(MigrationError::mismatch(at("nonce"), zk.nonce, mpt.nonce));
    }
    if zk.balance != mpt.balance {
        return Err(MigrationError::mismatch(at("balance"), &zk.balance, &mpt.balance));
    }
    if zk.code_hash != mpt.code_hash {
        return Err(MigrationError::mismatch(
            at("code hash"),
            hex::encode(zk.code_hash),
            hex::encode(mpt.code_hash),
        ));
    }
    Ok(())
}

fn compare_slot(address: &Address, slot: &[u8], zk_value: &[u8], mpt_value: Option<Vec<u8>>) -> MigrationResult<()> {
    let expected = trim_left_zeroes(zk_value);
    let actual = mpt_value.unwrap_or_default();
    if expected != actual.as_slice() {
        return Err(MigrationError::mismatch(
            format!("account {} slot {}", hex::encode(address), hex::encode(slot)),
            hex::encode(expected),
            hex::encode(actual),
        ));
    }
    Ok(())
}

fn count_leaves(trie: &SecureTrie) -> TrieResult<u64> {
    let mut count = 0u64;
    trie.for_each_leaf(&mut |_, _| {
        count += 1;
        Ok(())
    })?;
    Ok(count)
}

fn ignore_missing(result: Result<(), ZkTrieError>) -> MigrationResult<()> {
    match result {
        Ok(()) | Err(ZkTrieError::KeyNotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl StateMigrator {
    /// Compare the MPT at `mpt_root` with the ZK state at `zk_root`, field
    /// by field and slot by slot, then check both sides hold the same
    /// number of entries.
    pub(crate) fn validate_state(&self, mpt_root: &Hash, zk_root: &Hash) -> MigrationResult<()> {
        let started = Instant::now();
        let zk = ZkStateTrie::new(ZkHash::from_be_bytes(zk_root), self.zkdb.clone(), self.config.max_levels)?;
        let mpt = SecureTrie::new(*mpt_root, self.mptdb.clone());
        let accounts = AtomicU64::new(0);
        let slots = AtomicU64::new(0);

        hash_range_iterator(zk.tree(), self.config.validation_workers, &self.cancel, |_, leaf| {
            let address = self.preimages.resolve_address(leaf.key())?;
            let zk_account = StateAccount::from_zk_bytes(&leaf.data())?;
            let mpt_account = mpt
                .get_account(&address)?
                .ok_or_else(|| MigrationError::mismatch(format!("account {}", hex::encode(address)), "present", "missing"))?;
            compare_account(&address, &zk_account, &mpt_account)?;
            let count = self.validate_storage(&address, &zk_account.storage_root, &mpt_account.storage_root)?;
            accounts.fetch_add(1, Ordering::Relaxed);
            slots.fetch_add(count, Ordering::Relaxed);
            Ok(())
        })?;

        let accounts = accounts.into_inner();
        let mpt_accounts = count_leaves(&mpt)?;
        if accounts != mpt_accounts {
            return Err(MigrationError::mismatch("account count", accounts, mpt_accounts));
        }
        info!(
            "Validated state: mpt_root={} accounts={} slots={} elapsed={:?}",
            hex::encode(mpt_root),
            accounts,
            slots.into_inner(),
            started.elapsed()
        );
        Ok(())
    }

    /// Compare one storage trie and return its non-empty slot count
    fn validate_storage(&self, address: &Address, zk_root: &Hash, mpt_root: &Hash) -> MigrationResult<u64> {
        let zk_root = ZkHash::from_be_bytes(zk_root);
        if zk_root.is_zero() {
            if *mpt_root != EMPTY_ROOT {
                return Err(MigrationError::mismatch(
                    format!("account {} storage root", hex::encode(address)),
                    hex::encode(EMPTY_ROOT),
                    hex::encode(mpt_root),
                ));
            }
            return Ok(0);
        }

        let zk = ZkStateTrie::new(zk_root, self.zkdb.clone(), self.config.max_levels)?;
        let mpt = SecureTrie::new_storage(keccak256(address), *mpt_root, self.mptdb.clone());
        let count = AtomicU64::new(0);
        hash_range_iterator(zk.tree(), self.config.num_storage_workers, &self.cancel, |_, leaf| {
            let slot = self.preimages.resolve(leaf.key())?;
            let value = leaf.data();
            compare_slot(address, &slot, &value, mpt.get_storage(&slot)?)?;
            if !trim_left_zeroes(&value).is_empty() {
                count.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        })?;

        let count = count.into_inner();
        let mpt_count = count_leaves(&mpt)?;
        if count != mpt_count {
            return Err(MigrationError::mismatch(
                format!("account {} slot count", hex::encode(address)),
                count,
                mpt_count,
            ));
        }
        Ok(count)
    }

    /// Check a replayed block.
    ///
    /// The diff is first replayed on a shadow copy of the parent ZK state,
    /// which must reproduce the block's ZK root, including every storage
    /// root the diff claims. Then every touched account and slot of the MPT
    /// at `mpt_root` is compared with the diff.
    pub(crate) fn validate_block(&self, header: &BlockHeader, changes: &StateChanges, mpt_root: &Hash) -> MigrationResult<()> {
        let started = Instant::now();
        let parent_number = header.number.saturating_sub(1);
        let parent = self
            .chain
            .header_by_number(parent_number)?
            .ok_or(MigrationError::BlockNotFound(parent_number))?;

        let hasher = self.zkdb.hasher().clone();
        let max_levels = self.config.max_levels;
        let parent_state = ZkStateTrie::new(ZkHash::from_be_bytes(&parent.root), self.zkdb.clone(), max_levels)?;
        let mut shadow = parent_state.clone();
        let mut destructed_keys = HashMap::new();
        for address in &changes.destructed {
            let key = hasher.secure_key(address).map_err(ZkTrieError::from)?;
            ignore_missing(shadow.delete_by_hash(&key))?;
            destructed_keys.insert(key.to_be_bytes(), *address);
        }

        for (key, blob) in &changes.accounts {
            let zk_key = ZkHash::from_be_bytes(key);
            if blob.is_empty() {
                ignore_missing(shadow.delete_by_hash(&zk_key))?;
                continue;
            }
            let account = StateAccount::from_zk_bytes(blob)?;
            if let Some(slots) = changes.storage.get(key) {
                let base = if destructed_keys.contains_key(key) {
                    ZkHash::ZERO
                } else {
                    match parent_state.get_by_hash(&zk_key)? {
                        Some(previous) => ZkHash::from_be_bytes(&StateAccount::from_zk_bytes(&previous)?.storage_root),
                        None => ZkHash::ZERO,
                    }
                };
                let mut storage = ZkStateTrie::new(base, self.zkdb.clone(), max_levels)?;
                for (slot, value) in slots {
                    let slot = ZkHash::from_be_bytes(slot);
                    if trim_left_zeroes(value).is_empty() {
                        ignore_missing(storage.delete_by_hash(&slot))?;
                    } else {
                        storage.update_by_hash(&slot, value)?;
                    }
                }
                let root = storage.hash()?;
                if root.to_be_bytes() != account.storage_root {
                    return Err(MigrationError::mismatch(
                        format!("zk storage root of {}", zk_key),
                        hex::encode(account.storage_root),
                        hex::encode(root.to_be_bytes()),
                    ));
                }
            }
            shadow.update_by_hash(&zk_key, blob)?;
        }

        let shadow_root = shadow.hash()?;
        if shadow_root.to_be_bytes() != header.root {
            return Err(MigrationError::mismatch(
                format!("zk root of block {}", header.number),
                hex::encode(header.root),
                hex::encode(shadow_root.to_be_bytes()),
            ));
        }

        let mpt = SecureTrie::new(*mpt_root, self.mptdb.clone());
        for (key, blob) in &changes.accounts {
            let address = self.preimages.resolve_address(&ZkHash::from_be_bytes(key))?;
            let mpt_account = mpt.get_account(&address)?;
            if blob.is_empty() {
                if mpt_account.is_some() {
                    return Err(MigrationError::mismatch(format!("account {}", hex::encode(address)), "deleted", "present"));
                }
                continue;
            }
            let zk_account = StateAccount::from_zk_bytes(blob)?;
            let mpt_account = mpt_account
                .ok_or_else(|| MigrationError::mismatch(format!("account {}", hex::encode(address)), "present", "missing"))?;
            compare_account(&address, &zk_account, &mpt_account)?;

            if let Some(slots) = changes.storage.get(key) {
                let storage = SecureTrie::new_storage(keccak256(&address), mpt_account.storage_root, self.mptdb.clone());
                for (slot_key, value) in slots {
                    let slot = self.preimages.resolve(&ZkHash::from_be_bytes(slot_key))?;
                    compare_slot(&address, &slot, value, storage.get_storage(&slot)?)?;
                }
            }
        }

        for (key, address) in &destructed_keys {
            if changes.accounts.contains_key(key) {
                continue;
            }
            if mpt.get_account(address)?.is_some() {
                return Err(MigrationError::mismatch(
                    format!("destructed account {}", hex::encode(address)),
                    "absent",
                    "present",
                ));
            }
        }

        debug!("Validated block {} in {:?}", header.number, started.elapsed());
        Ok(())
    }
}

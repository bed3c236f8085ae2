use log::{debug, info};
use std::collections::BTreeSet;
use std::time::Instant;

use super::migrator::StateMigrator;
use super::{MigrationError, MigrationResult, Phase, ValidationKind};
use crate::chain::BlockHeader;
use crate::state::StateAccount;
use crate::storage::block_store::Hash;
use crate::storage::{StateChanges, StateChangesStore};
use crate::trie::{keccak256, SecureTrie, EMPTY_ROOT};
use crate::zk::ZkHash;

impl StateMigrator {
    /// Apply every recorded block after the migrated one up to `head`.
    ///
    /// Returns true once a block processed under MPT rules is reached, since
    /// the chain itself maintains the MPT from there on.
    pub(crate) fn catch_up(&self, head: u64) -> MigrationResult<bool> {
        let mut number = self.migrated_ref.block_number() + 1;
        while number <= head {
            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }
            let header = self
                .chain
                .header_by_number(number)?
                .ok_or(MigrationError::BlockNotFound(number))?;
            if self.chain.chain_config().is_mpt(header.time) {
                return Ok(true);
            }
            self.apply_block(&header)?;
            number += 1;
        }
        Ok(false)
    }

    /// Apply the diff of one block and advance the checkpoint in the same
    /// batch as its nodes
    fn apply_block(&self, header: &BlockHeader) -> MigrationResult<()> {
        let started = Instant::now();
        let changes = self
            .changes
            .read(header.number)?
            .ok_or(MigrationError::StateChangesNotFound(header.number))?;

        let overlay = scopeguard::guard(&self.mptdb, |db| db.discard());
        let root = self.apply_state_changes(&self.migrated_ref.root(), &changes)?;

        if self.config.validate_incremental {
            self.set_phase(Phase::Validating(ValidationKind::Incremental));
            self.validate_block(header, &changes, &root)?;
            self.set_phase(Phase::CatchingUp);
        }

        let mut ops = overlay.flush_ops();
        ops.extend(StateChangesStore::delete_ops(header.number));
        scopeguard::ScopeGuard::into_inner(overlay);
        self.migrated_ref.commit_with(root, header.number, ops)?;

        info!(
            "Applied state transition of block {}: root={} accounts={} slots={} destructs={} elapsed={:?}",
            header.number,
            hex::encode(root),
            changes.accounts.len(),
            changes.slot_count(),
            changes.destructed.len(),
            started.elapsed()
        );
        Ok(())
    }

    /// Replay a block diff on the MPT at `root`.
    ///
    /// Destructs come first. An account that is destructed and written in
    /// the same block starts over with empty storage.
    pub(crate) fn apply_state_changes(&self, root: &Hash, changes: &StateChanges) -> MigrationResult<Hash> {
        let mut accounts = SecureTrie::new(*root, self.mptdb.clone());

        for address in &changes.destructed {
            accounts.delete_account(address)?;
            debug!("Destructed account {}", hex::encode(address));
        }

        let touched: BTreeSet<&Hash> = changes.accounts.keys().chain(changes.storage.keys()).collect();
        for key in touched {
            let zk_key = ZkHash::from_be_bytes(key);
            let address = self.preimages.resolve_address(&zk_key)?;

            let account = match changes.accounts.get(key) {
                Some(blob) if blob.is_empty() => {
                    accounts.delete_account(&address)?;
                    continue;
                }
                Some(blob) => StateAccount::from_zk_bytes(blob)?,
                None => accounts
                    .get_account(&address)?
                    .ok_or_else(|| MigrationError::mismatch(format!("storage owner {}", hex::encode(address)), "account", "none"))?,
            };

            let current = if changes.destructed.contains(&address) {
                EMPTY_ROOT
            } else {
                match accounts.get_account(&address)? {
                    Some(existing) => existing.storage_root,
                    None => EMPTY_ROOT,
                }
            };

            let storage_root = match changes.storage.get(key) {
                Some(slots) if !slots.is_empty() => {
                    let mut storage = SecureTrie::new_storage(keccak256(&address), current, self.mptdb.clone());
                    for (slot_key, value) in slots {
                        let slot = self.preimages.resolve(&ZkHash::from_be_bytes(slot_key))?;
                        storage.update_storage(&slot, value)?;
                    }
                    self.commit_trie(&mut storage)?
                }
                _ => current,
            };
            accounts.update_account(&address, &account.with_storage_root(storage_root))?;
        }

        self.commit_trie(&mut accounts)
    }
}

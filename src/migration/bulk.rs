use log::{debug, info};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::migrator::StateMigrator;
use super::range::hash_range_iterator;
use super::MigrationResult;
use crate::chain::BlockHeader;
use crate::state::{Address, StateAccount};
use crate::storage::block_store::Hash;
use crate::trie::{keccak256, SecureTrie, EMPTY_ROOT};
use crate::zk::{ZkHash, ZkStateTrie};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl StateMigrator {
    /// Copy every account and slot of the ZK state at `header` into a fresh
    /// MPT and return its root. Account nodes stay in the overlay.
    pub(crate) fn migrate_state(&self, header: &BlockHeader) -> MigrationResult<Hash> {
        let started = Instant::now();
        let zk = ZkStateTrie::new(ZkHash::from_be_bytes(&header.root), self.zkdb.clone(), self.config.max_levels)?;
        let trie = Mutex::new(SecureTrie::new(EMPTY_ROOT, self.mptdb.clone()));

        self.progress.reset();
        let _logger = self.progress.start_logger(
            "Migrating state",
            Duration::from_secs(self.config.progress_interval_secs),
            &self.cancel,
        );

        hash_range_iterator(zk.tree(), self.config.num_account_workers, &self.cancel, |_, leaf| {
            let address = self.preimages.resolve_address(leaf.key())?;
            let account = StateAccount::from_zk_bytes(&leaf.data())?;
            let storage_root = self.migrate_storage(&address, &account.storage_root)?;
            lock(&trie).update_account(&address, &account.with_storage_root(storage_root))?;
            self.progress.add_account();
            Ok(())
        })?;

        let mut trie = match trie.into_inner() {
            Ok(trie) => trie,
            Err(poisoned) => poisoned.into_inner(),
        };
        let root = self.commit_trie(&mut trie)?;
        info!(
            "Account trie of block {} migrated: root={} accounts={} slots={} elapsed={:?}",
            header.number,
            hex::encode(root),
            self.progress.accounts(),
            self.progress.slots(),
            started.elapsed()
        );
        Ok(root)
    }

    /// Migrate the storage trie rooted at `zk_root` and persist its nodes
    fn migrate_storage(&self, address: &Address, zk_root: &Hash) -> MigrationResult<Hash> {
        let zk_root = ZkHash::from_be_bytes(zk_root);
        if zk_root.is_zero() {
            return Ok(EMPTY_ROOT);
        }
        let zk = ZkStateTrie::new(zk_root, self.zkdb.clone(), self.config.max_levels)?;
        let trie = Mutex::new(SecureTrie::new_storage(keccak256(address), EMPTY_ROOT, self.mptdb.clone()));

        hash_range_iterator(zk.tree(), self.config.num_storage_workers, &self.cancel, |_, leaf| {
            let slot = self.preimages.resolve(leaf.key())?;
            lock(&trie).update_storage(&slot, &leaf.data())?;
            self.progress.add_slot();
            Ok(())
        })?;

        let mut trie = match trie.into_inner() {
            Ok(trie) => trie,
            Err(poisoned) => poisoned.into_inner(),
        };
        let root = self.commit_trie(&mut trie)?;
        self.store.write_batch(self.mptdb.flush_ops())?;
        debug!("Storage of {} migrated: root={}", hex::encode(address), hex::encode(root));
        Ok(root)
    }
}

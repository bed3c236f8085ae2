//! A minimal ZK chain for integration tests.
//!
//! Blocks are produced the way the execution layer would: the ZK state is
//! updated and committed with its preimages, the header is stored, the diff
//! of the block is recorded and the block becomes safe.

#![allow(dead_code)]

use num_bigint::BigUint;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use zkt_migrator::chain::{BlockHeader, ChainBackend, ChainConfig, GenesisAccount, GenesisConfig};
use zkt_migrator::config::{HasherKind, MigrationConfig};
use zkt_migrator::migration::StateMigrator;
use zkt_migrator::state::{Address, StateAccount};
use zkt_migrator::storage::{BlockStore, Hash, KVStore, RocksDBStore, StateChanges, StateChangesStore};
use zkt_migrator::zk::{new_hasher, ZkHash, ZkStateTrie, ZkTrieDatabase, ZkTrieError, DEFAULT_MAX_LEVELS};

pub const GENESIS_TIME: u64 = 1_700_000_000;

pub fn address(n: u8) -> Address {
    let mut address = [0u8; 20];
    address[19] = n;
    address
}

pub fn word(n: u64) -> Hash {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&n.to_be_bytes());
    word
}

/// Three genesis accounts with zero, one and two storage slots
pub fn sample_genesis() -> GenesisConfig {
    let mut alloc = BTreeMap::new();
    for (n, slots) in [(1u8, 0u64), (2, 1), (3, 2)] {
        let mut storage = BTreeMap::new();
        for slot in 1..=slots {
            storage.insert(format!("0x{:02x}", slot), format!("0x{:x}", slot * 100));
        }
        alloc.insert(
            format!("0x{}", hex::encode(address(n))),
            GenesisAccount {
                balance: format!("{}", 1000 * n as u64),
                nonce: n as u64,
                code_hash: None,
                storage,
            },
        );
    }
    GenesisConfig { timestamp: GENESIS_TIME, alloc }
}

pub fn test_config() -> MigrationConfig {
    MigrationConfig {
        num_account_workers: 4,
        num_storage_workers: 2,
        validation_workers: 4,
        catch_up_interval_ms: 20,
        progress_interval_secs: 1,
        safe_block_poll_ms: 20,
        hasher: HasherKind::Keccak,
        ..MigrationConfig::default()
    }
}

pub struct TestChain {
    pub dir: TempDir,
    pub store: Arc<dyn KVStore>,
    pub blocks: Arc<BlockStore>,
    pub zkdb: Arc<ZkTrieDatabase>,
    pub changes: StateChangesStore,
    pub genesis: GenesisConfig,
    root: ZkHash,
    number: u64,
    time: u64,
}

impl TestChain {
    pub fn new(genesis: GenesisConfig) -> Self {
        let dir = tempdir().unwrap();
        let store: Arc<dyn KVStore> = Arc::new(RocksDBStore::new(dir.path()).unwrap());
        let blocks = Arc::new(BlockStore::new(store.clone(), ChainConfig::default()).unwrap());
        let zkdb = Arc::new(ZkTrieDatabase::new(store.clone(), new_hasher(HasherKind::Keccak)));

        let (root, ops) = genesis.build_zk_state(zkdb.clone(), DEFAULT_MAX_LEVELS).unwrap();
        store.write_batch(ops).unwrap();
        blocks
            .put_header(&BlockHeader { number: 0, root: root.to_be_bytes(), time: genesis.timestamp })
            .unwrap();
        blocks.set_safe_block(0).unwrap();

        Self {
            dir,
            changes: StateChangesStore::new(store.clone()),
            time: genesis.timestamp,
            store,
            blocks,
            zkdb,
            genesis,
            root,
            number: 0,
        }
    }

    pub fn head(&self) -> u64 {
        self.number
    }

    pub fn root(&self) -> Hash {
        self.root.to_be_bytes()
    }

    pub fn block(&mut self) -> BlockBuilder<'_> {
        BlockBuilder {
            chain: self,
            accounts: BTreeMap::new(),
            storage: BTreeMap::new(),
            destructed: BTreeSet::new(),
        }
    }

    pub fn migrator(&self, config: MigrationConfig) -> Arc<StateMigrator> {
        let backend: Arc<dyn ChainBackend> = self.blocks.clone();
        StateMigrator::new(config, self.store.clone(), backend, Some(&self.genesis)).unwrap()
    }

    fn state(&self) -> ZkStateTrie {
        ZkStateTrie::new(self.root, self.zkdb.clone(), DEFAULT_MAX_LEVELS).unwrap()
    }

    /// Current ZK account of `address`
    pub fn account(&self, address: &Address) -> Option<StateAccount> {
        self.state()
            .get(address)
            .unwrap()
            .map(|blob| StateAccount::from_zk_bytes(&blob).unwrap())
    }
}

fn ignore_missing(result: Result<(), ZkTrieError>) {
    match result {
        Ok(()) | Err(ZkTrieError::KeyNotFound) => {}
        Err(e) => panic!("{}", e),
    }
}

pub struct BlockBuilder<'a> {
    chain: &'a mut TestChain,
    /// `None` deletes the account
    accounts: BTreeMap<Address, Option<(u64, u64)>>,
    storage: BTreeMap<Address, BTreeMap<Hash, Hash>>,
    destructed: BTreeSet<Address>,
}

impl<'a> BlockBuilder<'a> {
    pub fn set_account(mut self, address: Address, nonce: u64, balance: u64) -> Self {
        self.accounts.insert(address, Some((nonce, balance)));
        self
    }

    pub fn delete_account(mut self, address: Address) -> Self {
        self.accounts.insert(address, None);
        self
    }

    pub fn set_slot(mut self, address: Address, slot: Hash, value: Hash) -> Self {
        self.storage.entry(address).or_default().insert(slot, value);
        self
    }

    pub fn destruct(mut self, address: Address) -> Self {
        self.destructed.insert(address);
        self
    }

    /// Execute the block, record its diff and mark it safe
    pub fn commit(self) -> BlockHeader {
        self.produce(true)
    }

    /// Execute the block and record its diff without making it safe
    pub fn commit_unsafe(self) -> BlockHeader {
        self.produce(false)
    }

    fn produce(self, safe: bool) -> BlockHeader {
        let BlockBuilder { chain, accounts, storage, destructed } = self;
        let mut state = chain.state();
        let mut changes = StateChanges::default();

        for address in &destructed {
            ignore_missing(state.delete(address));
            changes.destructed.insert(*address);
        }

        let touched: BTreeSet<Address> = accounts.keys().chain(storage.keys()).copied().collect();
        for address in touched {
            let key = state.hash_key(&address).unwrap();
            if let Some(None) = accounts.get(&address) {
                ignore_missing(state.delete(&address));
                changes.set_account(&key, Vec::new());
                continue;
            }

            let current = if destructed.contains(&address) {
                None
            } else {
                state.get(&address).unwrap().map(|blob| StateAccount::from_zk_bytes(&blob).unwrap())
            };
            let mut account = current.unwrap_or_else(|| StateAccount::empty([0u8; 32]));
            if let Some(Some((nonce, balance))) = accounts.get(&address) {
                account.nonce = *nonce;
                account.balance = BigUint::from(*balance);
            }

            if let Some(slots) = storage.get(&address) {
                let mut storage_trie =
                    ZkStateTrie::new(ZkHash::from_be_bytes(&account.storage_root), chain.zkdb.clone(), DEFAULT_MAX_LEVELS)
                        .unwrap();
                for (slot, value) in slots {
                    if *value == [0u8; 32] {
                        ignore_missing(storage_trie.delete(slot));
                    } else {
                        storage_trie.update(slot, value).unwrap();
                    }
                    changes.set_slot(&key, &storage_trie.hash_key(slot).unwrap(), value.to_vec());
                }
                let commit = storage_trie.commit().unwrap();
                chain.store.write_batch(commit.to_ops()).unwrap();
                account.storage_root = commit.root.to_be_bytes();
            }

            let blob = account.to_zk_bytes().unwrap();
            state.update(&address, &blob).unwrap();
            changes.set_account(&key, blob);
        }

        let commit = state.commit().unwrap();
        chain.store.write_batch(commit.to_ops()).unwrap();
        chain.root = commit.root;
        chain.number += 1;
        chain.time += 2;

        let header = BlockHeader { number: chain.number, root: commit.root.to_be_bytes(), time: chain.time };
        chain.blocks.put_header(&header).unwrap();
        chain.changes.write(header.number, &changes).unwrap();
        if safe {
            chain.blocks.set_safe_block(header.number).unwrap();
        }
        header
    }
}

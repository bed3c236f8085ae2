use log::info;
use num_bigint::BigUint;
use num_traits::Num;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{ChainError, ChainResult};
use crate::state::{Address, StateAccount, EMPTY_CODE_HASH};
use crate::storage::block_store::Hash;
use crate::storage::kv_store::WriteBatchOperation;
use crate::zk::{Hasher, ZkHash, ZkStateTrie, ZkTrieDatabase};

/// Genesis configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Genesis timestamp
    pub timestamp: u64,

    /// Initial accounts by hex address
    pub alloc: BTreeMap<String, GenesisAccount>,
}

/// Genesis account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Decimal or `0x`-prefixed hex balance
    pub balance: String,

    #[serde(default)]
    pub nonce: u64,

    /// Hex code hash, empty code when absent
    #[serde(default)]
    pub code_hash: Option<String>,

    /// Hex slot to hex value
    #[serde(default)]
    pub storage: BTreeMap<String, String>,
}

impl GenesisConfig {
    /// Load genesis configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> ChainResult<Self> {
        let config_str = fs::read_to_string(path)
            .map_err(|e| ChainError::Genesis(format!("Failed to read genesis config file: {}", e)))?;

        toml::from_str(&config_str)
            .map_err(|e| ChainError::Genesis(format!("Failed to parse genesis config file: {}", e)))
    }

    /// Save genesis configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ChainResult<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| ChainError::Genesis(format!("Failed to serialize genesis config: {}", e)))?;

        fs::write(path, config_str)
            .map_err(|e| ChainError::Genesis(format!("Failed to write genesis config file: {}", e)))
    }

    /// Parsed allocation: account and its storage slots
    pub fn accounts(&self) -> ChainResult<Vec<(Address, StateAccount, Vec<(Hash, Hash)>)>> {
        let mut accounts = Vec::with_capacity(self.alloc.len());
        for (address_hex, account) in &self.alloc {
            let address: Address = parse_fixed(address_hex)?;
            let balance = parse_balance(&account.balance)?;
            let code_hash = match &account.code_hash {
                Some(hex) => parse_fixed(hex)?,
                None => EMPTY_CODE_HASH,
            };
            let mut storage = Vec::with_capacity(account.storage.len());
            for (slot, value) in &account.storage {
                storage.push((parse_word(slot)?, parse_word(value)?));
            }
            let state = StateAccount {
                nonce: account.nonce,
                balance,
                storage_root: [0u8; 32],
                code_hash,
            };
            accounts.push((address, state, storage));
        }
        Ok(accounts)
    }

    /// Secure-key preimages of every genesis address and storage slot.
    ///
    /// Genesis state is written without recording preimages, so these are
    /// the only way to recover its keys.
    pub fn preimages(&self, hasher: &dyn Hasher) -> ChainResult<HashMap<ZkHash, Vec<u8>>> {
        let mut preimages = HashMap::new();
        for (address, _, storage) in self.accounts()? {
            let hash = hasher.secure_key(&address).map_err(genesis_error)?;
            preimages.insert(hash, address.to_vec());
            for (slot, _) in storage {
                let hash = hasher.secure_key(&slot).map_err(genesis_error)?;
                preimages.insert(hash, slot.to_vec());
            }
        }
        Ok(preimages)
    }

    /// Build the genesis ZK state. Returns the state root and the node
    /// writes; preimages are not part of the batch.
    pub fn build_zk_state(
        &self,
        db: Arc<ZkTrieDatabase>,
        max_levels: usize,
    ) -> ChainResult<(ZkHash, Vec<WriteBatchOperation>)> {
        let mut ops = Vec::new();
        let mut state = ZkStateTrie::new(ZkHash::ZERO, db.clone(), max_levels).map_err(genesis_error)?;
        for (address, mut account, storage) in self.accounts()? {
            if !storage.is_empty() {
                let mut storage_trie = ZkStateTrie::new(ZkHash::ZERO, db.clone(), max_levels).map_err(genesis_error)?;
                for (slot, value) in storage {
                    if value != [0u8; 32] {
                        storage_trie.update(&slot, &value).map_err(genesis_error)?;
                    }
                }
                let commit = storage_trie.commit().map_err(genesis_error)?;
                ops.extend(ZkTrieDatabase::node_ops(&commit.nodes));
                account.storage_root = commit.root.to_be_bytes();
            }
            let blob = account.to_zk_bytes().map_err(genesis_error)?;
            state.update(&address, &blob).map_err(genesis_error)?;
        }
        let commit = state.commit().map_err(genesis_error)?;
        ops.extend(ZkTrieDatabase::node_ops(&commit.nodes));
        info!("Built genesis state {} with {} accounts", commit.root, self.alloc.len());
        Ok((commit.root, ops))
    }
}

fn genesis_error(e: impl std::fmt::Display) -> ChainError {
    ChainError::Genesis(e.to_string())
}

fn parse_hex(s: &str) -> ChainResult<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let padded = if s.len() % 2 == 1 { format!("0{}", s) } else { s.to_string() };
    hex::decode(padded).map_err(|e| ChainError::Genesis(format!("Invalid hex {}: {}", s, e)))
}

fn parse_fixed<const N: usize>(s: &str) -> ChainResult<[u8; N]> {
    let bytes = parse_hex(s)?;
    if bytes.len() != N {
        return Err(ChainError::Genesis(format!("Expected {} bytes, got {} in {}", N, bytes.len(), s)));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Left-pad a hex value to a 32-byte word
fn parse_word(s: &str) -> ChainResult<Hash> {
    let bytes = parse_hex(s)?;
    if bytes.len() > 32 {
        return Err(ChainError::Genesis(format!("Word {} is longer than 32 bytes", s)));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

fn parse_balance(s: &str) -> ChainResult<BigUint> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => BigUint::from_str_radix(hex, 16),
        None => BigUint::from_str_radix(s, 10),
    };
    parsed.map_err(|e| ChainError::Genesis(format!("Invalid balance {}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv_store::{KVStore, MemoryStore};
    use crate::zk::{KeccakHasher, DEFAULT_MAX_LEVELS};
    use tempfile::tempdir;

    const GENESIS: &str = r#"
timestamp = 1700000000

[alloc.0x0000000000000000000000000000000000000001]
balance = "1000"

[alloc.0x00000000000000000000000000000000000000aa]
balance = "0xff"
nonce = 3
code_hash = "0x1111111111111111111111111111111111111111111111111111111111111111"

[alloc.0x00000000000000000000000000000000000000aa.storage]
"0x01" = "0x2a"
"0x02" = "0x0100"
"#;

    #[test]
    fn test_parse_and_preimages() {
        let genesis: GenesisConfig = toml::from_str(GENESIS).unwrap();
        let accounts = genesis.accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        let (_, contract, storage) = &accounts[1];
        assert_eq!(contract.balance, BigUint::from(255u32));
        assert_eq!(contract.nonce, 3);
        assert_eq!(storage[0].1[31], 0x2a);

        let preimages = genesis.preimages(&KeccakHasher).unwrap();
        assert_eq!(preimages.len(), 4);
        let slot_hash = KeccakHasher.secure_key(&storage[1].0).unwrap();
        assert_eq!(preimages[&slot_hash], storage[1].0.to_vec());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("genesis.toml");
        let genesis: GenesisConfig = toml::from_str(GENESIS).unwrap();
        genesis.save(&path).unwrap();
        assert_eq!(GenesisConfig::load(&path).unwrap(), genesis);
    }

    #[test]
    fn test_build_state_without_preimages() {
        let store: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        let db = Arc::new(ZkTrieDatabase::new(store.clone(), Arc::new(KeccakHasher)));
        let genesis: GenesisConfig = toml::from_str(GENESIS).unwrap();
        let (root, ops) = genesis.build_zk_state(db.clone(), DEFAULT_MAX_LEVELS).unwrap();
        store.write_batch(ops).unwrap();

        let state = ZkStateTrie::new(root, db.clone(), DEFAULT_MAX_LEVELS).unwrap();
        assert!(state.get(&[0x55u8; 20]).unwrap().is_none());

        let mut address = [0u8; 20];
        address[19] = 0xaa;
        let account = StateAccount::from_zk_bytes(&state.get(&address).unwrap().unwrap()).unwrap();
        assert_ne!(account.storage_root, [0u8; 32]);
        let hash = state.hash_key(&address).unwrap();
        assert!(db.preimage(&hash).unwrap().is_none());
    }
}

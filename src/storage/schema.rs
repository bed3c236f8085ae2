use byteorder::{BigEndian, ByteOrder};

use crate::storage::block_store::Hash;
use crate::zk::ZkHash;

/// Schema for keys in the shared key-value store.
///
/// ZK trie nodes, MPT nodes, preimages, chain data and migration records all
/// live in one store under disjoint prefixes.
pub struct Schema;

impl Schema {
    /// Prefix of ZK trie nodes
    pub const ZK_NODE_PREFIX: &'static [u8] = b"zk-";
    /// Prefix of secure-key preimages
    pub const PREIMAGE_PREFIX: &'static [u8] = b"secure-key-";
    /// Prefix of destructed-account records
    pub const DESTRUCT_CHANGES_PREFIX: &'static [u8] = b"dC-";
    /// Prefix of account-change records
    pub const ACCOUNT_CHANGES_PREFIX: &'static [u8] = b"aC-";
    /// Prefix of storage-change records
    pub const STORAGE_CHANGES_PREFIX: &'static [u8] = b"sC-";
    /// Prefix of block headers
    pub const HEADER_PREFIX: &'static [u8] = b"h-";

    // Trie nodes

    /// Key of a ZK trie node
    pub fn zk_node_key(hash: &ZkHash) -> Vec<u8> {
        [Self::ZK_NODE_PREFIX, &hash.as_le_bytes()[..]].concat()
    }

    /// Key of an MPT node; MPT nodes are stored under their bare hash
    pub fn mpt_node_key(hash: &Hash) -> Vec<u8> {
        hash.to_vec()
    }

    /// Key of the preimage of a ZK secure key
    pub fn preimage_key(hash: &ZkHash) -> Vec<u8> {
        [Self::PREIMAGE_PREFIX, &hash.to_be_bytes()[..]].concat()
    }

    // Per-block state changes

    /// Key of the destructed accounts of a block
    pub fn destruct_changes_key(block_number: u64) -> Vec<u8> {
        Self::block_key(Self::DESTRUCT_CHANGES_PREFIX, block_number)
    }

    /// Key of the account changes of a block
    pub fn account_changes_key(block_number: u64) -> Vec<u8> {
        Self::block_key(Self::ACCOUNT_CHANGES_PREFIX, block_number)
    }

    /// Key of the storage changes of a block
    pub fn storage_changes_key(block_number: u64) -> Vec<u8> {
        Self::block_key(Self::STORAGE_CHANGES_PREFIX, block_number)
    }

    // Migration checkpoint

    /// Key of the migrated MPT root
    pub fn migrated_root_key() -> &'static [u8] {
        b"MigratedRoot"
    }

    /// Key of the migrated block number
    pub fn migrated_number_key() -> &'static [u8] {
        b"MigratedNumber"
    }

    // Chain data

    /// Key of a header by number
    pub fn header_key(block_number: u64) -> Vec<u8> {
        Self::block_key(Self::HEADER_PREFIX, block_number)
    }

    /// Key of the head block number
    pub fn head_block_key() -> &'static [u8] {
        b"LastHeader"
    }

    /// Key of the safe block number
    pub fn safe_block_key() -> &'static [u8] {
        b"LastSafeBlock"
    }

    /// Key of the chain configuration
    pub fn chain_config_key() -> &'static [u8] {
        b"ChainConfig"
    }

    /// Parse the block number out of a per-block key
    pub fn parse_block_number(prefix: &[u8], key: &[u8]) -> Option<u64> {
        if key.len() != prefix.len() + 8 || !key.starts_with(prefix) {
            return None;
        }
        Some(BigEndian::read_u64(&key[prefix.len()..]))
    }

    fn block_key(prefix: &[u8], block_number: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 8);
        key.extend_from_slice(prefix);
        let mut number = [0u8; 8];
        BigEndian::write_u64(&mut number, block_number);
        key.extend_from_slice(&number);
        key
    }
}

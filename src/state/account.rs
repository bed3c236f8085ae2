use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable};
use alloy_trie::{TrieAccount, KECCAK_EMPTY};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::{StateError, StateResult};
use crate::storage::block_store::Hash;
use crate::trie::TrieError;

/// 20-byte account address
pub type Address = [u8; 20];

/// keccak256 of empty code
pub const EMPTY_CODE_HASH: Hash = KECCAK_EMPTY.0;

/// Size of the ZK account layout
pub const ZK_ACCOUNT_LEN: usize = 128;
/// Size of the ZK account layout carrying an extra code word
pub const ZK_ACCOUNT_LEN_EXT: usize = 160;

/// Account record as stored in either state trie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAccount {
    pub nonce: u64,
    pub balance: BigUint,
    /// Root of the account's storage trie, in the encoding of the trie the
    /// account belongs to
    pub storage_root: Hash,
    pub code_hash: Hash,
}

impl StateAccount {
    /// An account with no balance, code or storage in a trie whose empty
    /// root is `empty_root`
    pub fn empty(empty_root: Hash) -> Self {
        Self {
            nonce: 0,
            balance: BigUint::zero(),
            storage_root: empty_root,
            code_hash: EMPTY_CODE_HASH,
        }
    }

    /// Decode the fixed-width ZK layout:
    /// `[0:24]` zero padding, `[24:32]` nonce, `[32:64]` balance,
    /// `[64:96]` code hash, `[96:128]` storage root
    pub fn from_zk_bytes(data: &[u8]) -> StateResult<Self> {
        if data.len() != ZK_ACCOUNT_LEN && data.len() != ZK_ACCOUNT_LEN_EXT {
            return Err(StateError::InvalidLength(data.len()));
        }
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&data[24..32]);
        let mut code_hash = [0u8; 32];
        code_hash.copy_from_slice(&data[64..96]);
        let mut storage_root = [0u8; 32];
        storage_root.copy_from_slice(&data[96..128]);
        Ok(Self {
            nonce: u64::from_be_bytes(nonce),
            balance: BigUint::from_bytes_be(&data[32..64]),
            storage_root,
            code_hash,
        })
    }

    /// Encode into the 128-byte ZK layout
    pub fn to_zk_bytes(&self) -> StateResult<Vec<u8>> {
        let balance = self.balance.to_bytes_be();
        if balance.len() > 32 {
            return Err(StateError::BalanceOverflow);
        }
        let mut out = vec![0u8; ZK_ACCOUNT_LEN];
        out[24..32].copy_from_slice(&self.nonce.to_be_bytes());
        if !self.balance.is_zero() {
            out[64 - balance.len()..64].copy_from_slice(&balance);
        }
        out[64..96].copy_from_slice(&self.code_hash);
        out[96..128].copy_from_slice(&self.storage_root);
        Ok(out)
    }

    /// RLP `[nonce, balance, storage_root, code_hash]`
    pub fn to_rlp(&self) -> StateResult<Vec<u8>> {
        let balance = U256::try_from_be_slice(&self.balance.to_bytes_be()).ok_or(StateError::BalanceOverflow)?;
        let account = TrieAccount {
            nonce: self.nonce,
            balance,
            storage_root: B256::from(self.storage_root),
            code_hash: B256::from(self.code_hash),
        };
        let mut out = Vec::with_capacity(account.length());
        account.encode(&mut out);
        Ok(out)
    }

    pub fn from_rlp(data: &[u8]) -> StateResult<Self> {
        let mut buf = data;
        let account = TrieAccount::decode(&mut buf).map_err(TrieError::from)?;
        if !buf.is_empty() {
            return Err(StateError::InvalidEncoding(format!("{} trailing bytes", buf.len())));
        }
        Ok(Self {
            nonce: account.nonce,
            balance: BigUint::from_bytes_be(&account.balance.to_be_bytes::<32>()),
            storage_root: account.storage_root.0,
            code_hash: account.code_hash.0,
        })
    }

    /// Same account with the storage root of the other representation
    pub fn with_storage_root(&self, storage_root: Hash) -> Self {
        Self { storage_root, ..self.clone() }
    }
}

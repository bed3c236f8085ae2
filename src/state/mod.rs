//! Account model shared by both state representations.

pub mod account;

pub use account::{Address, StateAccount, EMPTY_CODE_HASH};

use crate::trie::TrieError;

/// Error type for account encoding
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Blob length is neither of the ZK account layouts
    #[error("Invalid zk account length: {0}")]
    InvalidLength(usize),

    /// Balance does not fit a 32-byte word
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Malformed RLP account
    #[error("Invalid account encoding: {0}")]
    InvalidEncoding(String),

    /// RLP decoding failure
    #[error("RLP error: {0}")]
    Trie(#[from] TrieError),
}

/// Result alias for account encoding
pub type StateResult<T> = Result<T, StateError>;

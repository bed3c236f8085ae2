//! Migration of a chain's world state from a sparse binary ZK trie to an
//! Ethereum Merkle Patricia Trie.

pub mod chain;
pub mod config;
pub mod migration;
pub mod state;
pub mod storage;
pub mod trie;
pub mod zk;

/// Initialise `env_logger`. `RUST_LOG` wins over `level` when set.
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // A second initialisation only happens in tests
    let _ = env_logger::Builder::from_env(env).try_init();
}

// Storage module for the migrator
// One key-value store holds both tries, chain data and migration records

pub mod block_store;
pub mod kv_store;
pub mod migrated_ref;
pub mod schema;
pub mod state_changes;

// Re-export main components
pub use block_store::{BlockStore, BlockStoreError, Hash};
pub use kv_store::{KVStore, KVStoreError, MemoryStore, RocksDBStore};
pub use migrated_ref::MigratedRef;
pub use schema::Schema;
pub use state_changes::{StateChanges, StateChangesStore};

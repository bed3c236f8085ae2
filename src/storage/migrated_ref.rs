use log::info;
use std::sync::{Arc, Mutex};

use crate::storage::block_store::Hash;
use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation, WriteBatchOperationExt};
use crate::storage::schema::Schema;
use crate::trie::EMPTY_ROOT;

/// Persisted migration checkpoint: the MPT root that mirrors the ZK state
/// of `block_number`.
pub struct MigratedRef {
    store: Arc<dyn KVStore>,
    inner: Mutex<(Hash, u64)>,
}

impl MigratedRef {
    /// Load the checkpoint. A store without one yields the empty root at
    /// block 0.
    pub fn new(store: Arc<dyn KVStore>) -> Result<Self, KVStoreError> {
        let root = match store.get(Schema::migrated_root_key())? {
            Some(bytes) if bytes.len() == 32 => {
                let mut root = [0u8; 32];
                root.copy_from_slice(&bytes);
                root
            }
            Some(bytes) if !bytes.is_empty() => {
                return Err(KVStoreError::InvalidDataFormat(format!(
                    "migrated root of {} bytes",
                    bytes.len()
                )))
            }
            _ => EMPTY_ROOT,
        };
        let number = match store.get(Schema::migrated_number_key())? {
            Some(bytes) if !bytes.is_empty() => decode_number(&bytes)?,
            _ => 0,
        };
        Ok(Self {
            store,
            inner: Mutex::new((root, number)),
        })
    }

    pub fn root(&self) -> Hash {
        self.lock().0
    }

    pub fn block_number(&self) -> u64 {
        self.lock().1
    }

    /// Whether nothing has been migrated yet
    pub fn is_empty(&self) -> bool {
        self.root() == EMPTY_ROOT
    }

    /// Batch operations persisting a new checkpoint
    pub fn update_ops(root: &Hash, number: u64) -> Vec<WriteBatchOperation> {
        let mut batch = WriteBatchOperation::new();
        batch.put(Schema::migrated_root_key().to_vec(), root.to_vec());
        batch.put(Schema::migrated_number_key().to_vec(), encode_number(number).into_bytes());
        batch
    }

    /// Write `ops` together with the new checkpoint and then expose it
    pub fn commit_with(&self, root: Hash, number: u64, mut ops: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        let mut inner = self.lock();
        ops.extend(Self::update_ops(&root, number));
        self.store.write_batch(ops)?;
        *inner = (root, number);
        info!("Migrated state advanced to block {} with root {}", number, hex::encode(root));
        Ok(())
    }

    /// Persist a new checkpoint on its own
    pub fn update(&self, root: Hash, number: u64) -> Result<(), KVStoreError> {
        self.commit_with(root, number, Vec::new())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (Hash, u64)> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// `0x`-prefixed lowercase hex without leading zeroes
fn encode_number(number: u64) -> String {
    format!("{:#x}", number)
}

fn decode_number(bytes: &[u8]) -> Result<u64, KVStoreError> {
    let text = std::str::from_utf8(bytes).map_err(|e| KVStoreError::DeserializationError(e.to_string()))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| KVStoreError::DeserializationError(format!("migrated number {} lacks 0x", text)))?;
    u64::from_str_radix(digits, 16).map_err(|e| KVStoreError::DeserializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv_store::{MemoryStore, RocksDBStore};
    use tempfile::tempdir;

    #[test]
    fn test_defaults_to_empty_root() {
        let migrated = MigratedRef::new(Arc::new(MemoryStore::new())).unwrap();
        assert!(migrated.is_empty());
        assert_eq!(migrated.block_number(), 0);
    }

    #[test]
    fn test_number_encoding() {
        assert_eq!(encode_number(0), "0x0");
        assert_eq!(encode_number(255), "0xff");
        assert_eq!(decode_number(b"0x1a2b").unwrap(), 0x1a2b);
        assert!(decode_number(b"1a2b").is_err());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let kv: Arc<dyn KVStore> = Arc::new(RocksDBStore::new(dir.path()).unwrap());
        let migrated = MigratedRef::new(kv.clone()).unwrap();
        let mut extra = WriteBatchOperation::new();
        extra.put(b"other".to_vec(), b"value".to_vec());
        migrated.commit_with([8u8; 32], 42, extra).unwrap();

        let reopened = MigratedRef::new(kv.clone()).unwrap();
        assert_eq!(reopened.root(), [8u8; 32]);
        assert_eq!(reopened.block_number(), 42);
        assert_eq!(kv.get(Schema::migrated_number_key()).unwrap(), Some(b"0x2a".to_vec()));
        assert_eq!(kv.get(b"other").unwrap(), Some(b"value".to_vec()));
    }
}

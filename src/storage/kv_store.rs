//! Byte-oriented key-value storage shared by the ZK trie, the MPT trie,
//! the chain records and the migration bookkeeping.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

/// Failure reported by a [`KVStore`] backend
#[derive(Debug, thiserror::Error)]
pub enum KVStoreError {
    #[error("rocksdb: {0}")]
    RocksDBError(String),

    #[error("could not encode record: {0}")]
    SerializationError(String),

    #[error("could not decode record: {0}")]
    DeserializationError(String),

    #[error("malformed record: {0}")]
    InvalidDataFormat(String),

    #[error("atomic batch rejected: {0}")]
    BatchOperationFailed(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl From<rocksdb::Error> for KVStoreError {
    fn from(err: rocksdb::Error) -> Self {
        KVStoreError::RocksDBError(err.into_string())
    }
}

impl From<bincode::Error> for KVStoreError {
    fn from(err: bincode::Error) -> Self {
        KVStoreError::SerializationError(err.to_string())
    }
}

/// One entry of an atomic write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteBatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WriteBatchOperation {
    /// Empty batch, filled through [`WriteBatchOperationExt`]
    pub fn new() -> Vec<WriteBatchOperation> {
        Vec::new()
    }
}

/// Builder helpers on a pending batch
pub trait WriteBatchOperationExt {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: Vec<u8>);
}

impl WriteBatchOperationExt for Vec<WriteBatchOperation> {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.push(WriteBatchOperation::Put { key, value });
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.push(WriteBatchOperation::Delete { key });
    }
}

/// Storage backend seen by every other component.
///
/// `write_batch` must apply all of its operations or none of them; migration
/// progress and trie nodes are committed together through it.
pub trait KVStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError>;

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.get(key)?.is_some())
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError>;

    /// All pairs whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;

    fn flush(&self) -> Result<(), KVStoreError>;
}

/// Persistent backend
pub struct RocksDBStore {
    db: DB,
}

impl RocksDBStore {
    /// Open (or create) a database with default tuning
    pub fn new(path: &Path) -> Result<Self, KVStoreError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        Self::with_options(path, options)
    }

    /// Open a database with caller-supplied options
    pub fn with_options(path: &Path, options: Options) -> Result<Self, KVStoreError> {
        match DB::open(&options, path) {
            Ok(db) => {
                log::debug!("Opened key-value store at {}", path.display());
                Ok(Self { db })
            }
            Err(e) => Err(KVStoreError::RocksDBError(format!(
                "cannot open {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl KVStore for RocksDBStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        Ok(self.db.put(key, value)?)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.db.get(key)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        Ok(self.db.delete(key)?)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.db.get_pinned(key)?.is_some())
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        let count = operations.len();
        let batch = operations.into_iter().fold(WriteBatch::default(), |mut batch, op| {
            match op {
                WriteBatchOperation::Put { key, value } => batch.put(key, value),
                WriteBatchOperation::Delete { key } => batch.delete(key),
            }
            batch
        });
        self.db.write(batch).map_err(|e| {
            KVStoreError::BatchOperationFailed(format!("{} operations: {}", count, e))
        })
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let mut pairs = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            pairs.push((key.into_vec(), value.into_vec()));
        }
        Ok(pairs)
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        Ok(self.db.flush()?)
    }
}

/// Volatile backend for shadow tries and tests
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, KVStoreError> {
        self.entries.read().map_err(|_| KVStoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, KVStoreError> {
        self.entries.write().map_err(|_| KVStoreError::LockPoisoned)
    }
}

impl KVStore for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.write()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.read()?.get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.write()?.remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.read()?.contains_key(key))
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        // one guard for the whole batch
        let mut entries = self.write()?;
        for op in operations {
            match op {
                WriteBatchOperation::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteBatchOperation::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(self
            .read()?
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn KVStore) {
        store.put(b"zk-aa", b"leaf").unwrap();
        assert_eq!(store.get(b"zk-aa").unwrap(), Some(b"leaf".to_vec()));
        assert!(store.exists(b"zk-aa").unwrap());
        assert!(!store.exists(b"zk-ab").unwrap());

        let mut batch = WriteBatchOperation::new();
        batch.delete(b"zk-aa".to_vec());
        batch.put(b"zk-ab".to_vec(), b"parent".to_vec());
        batch.put(b"secure-key-01".to_vec(), b"addr".to_vec());
        batch.put(b"zk-ac".to_vec(), b"empty".to_vec());
        store.write_batch(batch).unwrap();
        assert_eq!(store.get(b"zk-aa").unwrap(), None);

        // "zk." sorts right after the "zk-" range
        store.put(b"zk.", b"outside").unwrap();
        let keys: Vec<_> = store
            .scan_prefix(b"zk-")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"zk-ab".to_vec(), b"zk-ac".to_vec()]);

        store.delete(b"secure-key-01").unwrap();
        assert!(store.scan_prefix(b"secure-key-").unwrap().is_empty());
    }

    #[test]
    fn test_rocksdb_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::new(dir.path()).unwrap();
        exercise(&store);
        store.flush().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        exercise(&store);
        assert_eq!(store.len(), 3);
    }
}

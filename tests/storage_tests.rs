use std::sync::Arc;
use tempfile::tempdir;

use zkt_migrator::chain::{BlockHeader, ChainBackend, ChainConfig};
use zkt_migrator::storage::kv_store::WriteBatchOperation;
use zkt_migrator::storage::{
    BlockStore, KVStore, MigratedRef, RocksDBStore, Schema, StateChanges, StateChangesStore,
};
use zkt_migrator::trie::EMPTY_ROOT;
use zkt_migrator::zk::ZkHash;

#[test]
fn test_rocksdb_integration() {
    let temp_dir = tempdir().unwrap();
    let store = RocksDBStore::new(temp_dir.path()).unwrap();

    store.put(b"test_key", b"test_value").unwrap();
    assert_eq!(store.get(b"test_key").unwrap().unwrap(), b"test_value");
    store.delete(b"test_key").unwrap();
    assert!(store.get(b"test_key").unwrap().is_none());

    let batch = vec![
        WriteBatchOperation::Put { key: b"zk-1".to_vec(), value: b"a".to_vec() },
        WriteBatchOperation::Put { key: b"zk-2".to_vec(), value: b"b".to_vec() },
        WriteBatchOperation::Put { key: b"zl-3".to_vec(), value: b"c".to_vec() },
    ];
    store.write_batch(batch).unwrap();
    let scanned = store.scan_prefix(Schema::ZK_NODE_PREFIX).unwrap();
    assert_eq!(scanned.len(), 2);
    assert!(store.exists(b"zl-3").unwrap());
}

#[test]
fn test_checkpoint_and_diffs_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let root = [7u8; 32];
    let mut changes = StateChanges::default();
    changes.destructed.insert([1u8; 20]);
    changes.set_account(&ZkHash::from_be_bytes(&[2u8; 32]), vec![0u8; 128]);
    changes.set_slot(&ZkHash::from_be_bytes(&[2u8; 32]), &ZkHash::from_be_bytes(&[3u8; 32]), vec![9u8; 32]);

    {
        let store: Arc<dyn KVStore> = Arc::new(RocksDBStore::new(temp_dir.path()).unwrap());
        let diffs = StateChangesStore::new(store.clone());
        diffs.write(5, &changes).unwrap();
        diffs.write(6, &StateChanges::default()).unwrap();

        let migrated = MigratedRef::new(store.clone()).unwrap();
        assert_eq!(migrated.root(), EMPTY_ROOT);
        // Advancing the checkpoint consumes the diff in the same batch
        migrated.commit_with(root, 5, StateChangesStore::delete_ops(5)).unwrap();
        store.flush().unwrap();
    }

    let store: Arc<dyn KVStore> = Arc::new(RocksDBStore::new(temp_dir.path()).unwrap());
    let migrated = MigratedRef::new(store.clone()).unwrap();
    assert_eq!((migrated.root(), migrated.block_number()), (root, 5));

    let diffs = StateChangesStore::new(store);
    assert!(!diffs.exists(5).unwrap());
    assert_eq!(diffs.read(6).unwrap(), Some(StateChanges::default()));
    assert_eq!(diffs.pending_blocks().unwrap(), vec![6]);
}

#[test]
fn test_block_store_backend() {
    let temp_dir = tempdir().unwrap();
    let store: Arc<dyn KVStore> = Arc::new(RocksDBStore::new(temp_dir.path()).unwrap());
    let blocks = BlockStore::new(store.clone(), ChainConfig::default()).unwrap();
    assert!(blocks.safe_block().unwrap().is_none());

    for number in 0..3u64 {
        blocks
            .put_header(&BlockHeader { number, root: [number as u8; 32], time: 100 + number })
            .unwrap();
    }
    assert!(blocks.set_safe_block(7).is_err());
    blocks.set_safe_block(1).unwrap();
    assert_eq!(blocks.safe_block().unwrap().unwrap().root, [1u8; 32]);
    assert_eq!(blocks.head_number().unwrap(), Some(2));

    let old = blocks.swap_chain_config(ChainConfig::default().with_mpt_time(102)).unwrap();
    assert!(old.zktrie);
    let reopened = BlockStore::new(store, ChainConfig::default()).unwrap();
    let config = reopened.chain_config();
    assert!(!config.is_mpt(101));
    assert!(config.is_mpt(102));
}

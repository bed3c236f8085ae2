use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use zkt_migrator::config::HasherKind;
use zkt_migrator::migration::hash_range_iterator;
use zkt_migrator::storage::{KVStore, MemoryStore};
use zkt_migrator::zk::{
    hash_to_iterator_key, new_hasher, verify_proof, ZkHash, ZkStateTrie, ZkTrieDatabase, DEFAULT_MAX_LEVELS,
};

fn database() -> Arc<ZkTrieDatabase> {
    let store: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
    Arc::new(ZkTrieDatabase::new(store, new_hasher(HasherKind::Keccak)))
}

/// Commit `n` random slots and reopen the trie from the store
fn persisted_trie(db: &Arc<ZkTrieDatabase>, rng: &mut StdRng, n: usize) -> (ZkStateTrie, BTreeMap<[u8; 32], [u8; 32]>) {
    let mut trie = ZkStateTrie::new(ZkHash::ZERO, db.clone(), DEFAULT_MAX_LEVELS).unwrap();
    let mut entries = BTreeMap::new();
    for _ in 0..n {
        let key: [u8; 32] = rng.gen();
        let mut value: [u8; 32] = rng.gen();
        value[0] = 1;
        trie.update(&key, &value).unwrap();
        entries.insert(key, value);
    }
    let commit = trie.commit().unwrap();
    db.store().write_batch(commit.to_ops()).unwrap();
    let reopened = ZkStateTrie::new(commit.root, db.clone(), DEFAULT_MAX_LEVELS).unwrap();
    (reopened, entries)
}

#[test]
fn test_range_workers_visit_every_leaf_once() {
    let db = database();
    let mut rng = StdRng::seed_from_u64(11);
    let (trie, entries) = persisted_trie(&db, &mut rng, 500);

    for n in [1usize, 2, 8, num_cpus::get()] {
        let seen = Mutex::new(HashMap::new());
        hash_range_iterator(trie.tree(), n, &CancellationToken::new(), |key, leaf| {
            assert_eq!(hash_to_iterator_key(leaf.key()), *key);
            *seen.lock().unwrap().entry(*leaf.key()).or_insert(0usize) += 1;
            Ok(())
        })
        .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), entries.len(), "workers={}", n);
        assert!(seen.values().all(|count| *count == 1), "workers={}", n);
        for key in entries.keys() {
            assert!(seen.contains_key(&trie.hash_key(key).unwrap()));
        }
    }
}

#[test]
fn test_ordered_iteration_from_any_key() {
    let db = database();
    let mut rng = StdRng::seed_from_u64(12);
    let (trie, _) = persisted_trie(&db, &mut rng, 120);

    let all: Vec<[u8; 32]> = trie.iter_from(&[0u8; 32]).map(|item| item.unwrap().0).collect();
    assert!(all.windows(2).all(|pair| pair[0] < pair[1]));

    let start = all[all.len() / 2];
    let tail: Vec<[u8; 32]> = trie.iter_from(&start).map(|item| item.unwrap().0).collect();
    assert_eq!(tail, all[all.len() / 2..].to_vec());
}

#[test]
fn test_proofs_over_random_trees() {
    let db = database();
    let hasher = db.hasher().clone();
    let mut rng = StdRng::seed_from_u64(13);

    for round in 0..110usize {
        let size = match round {
            0 => 0,
            1 => 1,
            _ => rng.gen_range(2..40),
        };
        let (trie, entries) = persisted_trie(&db, &mut rng, size);
        let root = trie.hash().unwrap();

        for (key, value) in &entries {
            let mut proof = HashMap::new();
            trie.prove(key, &mut |hash, blob| {
                proof.insert(hash, blob);
                Ok(())
            })
            .unwrap();
            let leaf = verify_proof(hasher.as_ref(), &root, &trie.hash_key(key).unwrap(), &proof, DEFAULT_MAX_LEVELS)
                .unwrap()
                .expect("inclusion proof");
            assert_eq!(leaf.data(), value.to_vec());
        }

        let absent: [u8; 32] = rng.gen();
        let mut proof = HashMap::new();
        trie.prove(&absent, &mut |hash, blob| {
            proof.insert(hash, blob);
            Ok(())
        })
        .unwrap();
        let absent_key = trie.hash_key(&absent).unwrap();
        assert!(verify_proof(hasher.as_ref(), &root, &absent_key, &proof, DEFAULT_MAX_LEVELS)
            .unwrap()
            .is_none());
    }
}

#[test]
fn test_deleting_everything_restores_empty_root() {
    let db = database();
    let mut rng = StdRng::seed_from_u64(14);
    let (mut trie, entries) = persisted_trie(&db, &mut rng, 64);
    for key in entries.keys() {
        trie.delete(key).unwrap();
    }
    assert_eq!(trie.hash().unwrap(), ZkHash::ZERO);
}

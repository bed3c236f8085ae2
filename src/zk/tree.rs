//! The sparse binary Merkle tree.
//!
//! Nodes are immutable once shared. Mutations rebuild the parents along the
//! touched path and leave every other subtree in place, so a cloned tree is
//! a cheap snapshot that readers on other threads can walk while the
//! live tree keeps changing.

use log::error;
use std::fmt;
use std::sync::Arc;

use super::database::NodeReader;
use super::hash::ZkHash;
use super::hasher::SharedHasher;
use super::iterator::LeafIterator;
use super::node::{LeafNode, NodeRef, ParentNode, TreeNode};
use super::tree_path::TreePath;
use super::{ZkTrieError, ZkTrieResult, DEFAULT_MAX_LEVELS};

/// Binary Merkle tree keyed by 256-bit digests
#[derive(Clone)]
pub struct MerkleTree {
    root: NodeRef,
    max_levels: usize,
    hasher: SharedHasher,
    reader: Option<Arc<dyn NodeReader>>,
}

impl fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleTree")
            .field("root", &self.root)
            .field("max_levels", &self.max_levels)
            .field("hasher", &self.hasher.name())
            .finish()
    }
}

impl MerkleTree {
    /// Create an empty in-memory tree
    pub fn new(hasher: SharedHasher) -> Self {
        Self {
            root: TreeNode::empty(),
            max_levels: DEFAULT_MAX_LEVELS,
            hasher,
            reader: None,
        }
    }

    /// Open the tree stored under `root_hash`
    pub fn from_root(root_hash: ZkHash, reader: Arc<dyn NodeReader>, hasher: SharedHasher) -> ZkTrieResult<Self> {
        let mut tree = Self {
            root: TreeNode::empty(),
            max_levels: DEFAULT_MAX_LEVELS,
            hasher,
            reader: Some(reader),
        };
        if !root_hash.is_zero() {
            tree.root = tree.load_node(&root_hash)?;
        }
        Ok(tree)
    }

    /// Set the maximum depth
    pub fn with_max_levels(mut self, max_levels: usize) -> Self {
        self.max_levels = max_levels;
        self
    }

    /// Root node
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Maximum depth
    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Hasher of this tree
    pub fn hasher(&self) -> &SharedHasher {
        &self.hasher
    }

    /// Root digest, computing missing hashes first
    pub fn hash(&self) -> ZkTrieResult<ZkHash> {
        self.compute_all_hashes(&mut |_| Ok(()))
    }

    /// Compute every missing node hash. `on_dirty` sees each node whose
    /// hash was computed by this call exactly once, children first.
    pub fn compute_all_hashes(
        &self,
        on_dirty: &mut dyn FnMut(&TreeNode) -> ZkTrieResult<()>,
    ) -> ZkTrieResult<ZkHash> {
        self.root.compute_hash(self.hasher.as_ref(), on_dirty)
    }

    /// Value stored under `key`
    pub fn get(&self, key: &ZkHash) -> ZkTrieResult<Option<Vec<u8>>> {
        Ok(self.get_leaf(key)?.map(|leaf| leaf.data()))
    }

    /// Leaf stored under `key`
    pub fn get_leaf(&self, key: &ZkHash) -> ZkTrieResult<Option<LeafNode>> {
        let path = self.path(key);
        let mut node = self.resolve(&self.root)?;
        let mut level = 0;
        loop {
            match &*node {
                TreeNode::Parent(parent) => {
                    if level >= path.len() {
                        return Err(ZkTrieError::ReachedMaxLevel);
                    }
                    node = self.child(parent, path.get(level))?;
                    level += 1;
                }
                TreeNode::Leaf(leaf) => {
                    return Ok(if leaf.key() == key { Some(leaf.clone()) } else { None });
                }
                TreeNode::Empty => return Ok(None),
                TreeNode::Hash(_) => return Err(ZkTrieError::UnresolvedHashNode(level)),
            }
        }
    }

    /// Associate `value` with `key`
    pub fn update(&mut self, key: &ZkHash, value: &[u8]) -> ZkTrieResult<()> {
        self.add_leaf(LeafNode::new(*key, value)?)
    }

    /// Insert a prepared leaf, replacing any leaf with the same key
    pub fn add_leaf(&mut self, leaf: LeafNode) -> ZkTrieResult<()> {
        let path = self.path(leaf.key());
        let new_leaf: NodeRef = Arc::new(TreeNode::Leaf(leaf.clone()));
        let root = self.resolve(&self.root)?;
        self.root = self.insert(&new_leaf, &leaf, &root, 0, &path)?;
        Ok(())
    }

    fn insert(
        &self,
        new_leaf: &NodeRef,
        new: &LeafNode,
        node: &NodeRef,
        level: usize,
        path: &TreePath,
    ) -> ZkTrieResult<NodeRef> {
        if level >= self.max_levels {
            return Err(ZkTrieError::ReachedMaxLevel);
        }
        match &**node {
            TreeNode::Parent(parent) => {
                let dir = path.get(level);
                let child = self.child(parent, dir)?;
                let new_child = self.insert(new_leaf, new, &child, level + 1, path)?;
                if Arc::ptr_eq(&new_child, &child) {
                    return Ok(node.clone());
                }
                let mut parent = parent.clone();
                parent.set_child(dir, new_child);
                Ok(Arc::new(TreeNode::Parent(parent)))
            }
            TreeNode::Leaf(old_leaf) => {
                if old_leaf.key() != new.key() {
                    let old_path = self.path(old_leaf.key());
                    return self.push_leaf(new_leaf, node, path, &old_path, level);
                }
                if old_leaf.same_value(new) {
                    return Ok(node.clone());
                }
                Ok(new_leaf.clone())
            }
            TreeNode::Empty => Ok(new_leaf.clone()),
            TreeNode::Hash(_) => Err(ZkTrieError::UnresolvedHashNode(level)),
        }
    }

    /// Push `old_leaf` down until its path diverges from the new leaf and
    /// return the subtree holding both.
    fn push_leaf(
        &self,
        new_leaf: &NodeRef,
        old_leaf: &NodeRef,
        new_path: &TreePath,
        old_path: &TreePath,
        old_level: usize,
    ) -> ZkTrieResult<NodeRef> {
        let max_level = new_path.len().min(old_path.len()).min(self.max_levels);
        let mut fork = old_level;
        while fork < max_level - 1 && new_path.get(fork) == old_path.get(fork) {
            fork += 1;
        }
        if new_path.get(fork) == old_path.get(fork) {
            return Err(ZkTrieError::ReachedMaxLevel);
        }

        let mut node = Arc::new(TreeNode::Parent(ParentNode::with_child(
            new_path.get(fork),
            new_leaf.clone(),
            old_leaf.clone(),
        )));
        for level in (old_level..fork).rev() {
            node = Arc::new(TreeNode::Parent(ParentNode::with_child(
                new_path.get(level),
                node,
                TreeNode::empty(),
            )));
        }
        Ok(node)
    }

    /// Remove `key`. Orphaned nodes stay in the backing store.
    pub fn delete(&mut self, key: &ZkHash) -> ZkTrieResult<()> {
        let path = self.path(key);
        let mut node = self.resolve(&self.root)?;
        let mut ancestors: Vec<ParentNode> = Vec::new();
        loop {
            match &*node {
                TreeNode::Parent(parent) => {
                    let level = ancestors.len();
                    if level >= path.len() {
                        return Err(ZkTrieError::KeyNotFound);
                    }
                    ancestors.push(parent.clone());
                    node = self.child(parent, path.get(level))?;
                }
                TreeNode::Leaf(leaf) if leaf.key() == key => {
                    self.root = self.rm_and_upload(&path, &ancestors)?;
                    return Ok(());
                }
                _ => return Err(ZkTrieError::KeyNotFound),
            }
        }
    }

    /// Rebuild the path above a removed leaf, collapsing the single-child
    /// chains the removal leaves behind.
    fn rm_and_upload(&self, path: &TreePath, ancestors: &[ParentNode]) -> ZkTrieResult<NodeRef> {
        let depth = ancestors.len();
        if depth == 0 {
            return Ok(TreeNode::empty());
        }

        let last = depth - 1;
        let last_sibling = self.child(&ancestors[last], path.other(last))?;
        if let TreeNode::Parent(_) = &*last_sibling {
            // The sibling subtree holds at least two leaves and has to keep its level
            return Ok(self.rebuild(path, ancestors, last, TreeNode::empty()));
        }
        if depth == 1 {
            return Ok(last_sibling);
        }

        // Move the remaining leaf up to the first ancestor with another branch
        for level in (0..last).rev() {
            let sibling = self.child(&ancestors[level], path.other(level))?;
            if sibling.is_empty() {
                continue;
            }
            return Ok(self.rebuild(path, ancestors, level, last_sibling));
        }
        Ok(last_sibling)
    }

    /// Place `node` at `level` along `path` and rebuild the ancestors above it
    fn rebuild(&self, path: &TreePath, ancestors: &[ParentNode], level: usize, node: NodeRef) -> NodeRef {
        let mut node = node;
        for lvl in (0..=level).rev() {
            let mut parent = ancestors[lvl].clone();
            parent.set_child(path.get(lvl), node);
            node = Arc::new(TreeNode::Parent(parent));
        }
        node
    }

    /// Emit every node on the path to `key`, root first, ending with the
    /// first leaf or empty node.
    pub fn prove(&self, key: &ZkHash, emit: &mut dyn FnMut(&TreeNode) -> ZkTrieResult<()>) -> ZkTrieResult<()> {
        self.hash()?;
        let path = self.path(key);
        let mut node = self.resolve(&self.root)?;
        let mut level = 0;
        loop {
            emit(&node)?;
            match &*node {
                TreeNode::Parent(parent) if level < path.len() => {
                    node = self.child(parent, path.get(level))?;
                    level += 1;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Iterate over all leaves in ascending iterator-key order
    pub fn iter(&self) -> LeafIterator<'_> {
        LeafIterator::new(self, None)
    }

    /// Iterate over the leaves whose iterator key is at least `start`
    pub fn iter_from(&self, start: &[u8; 32]) -> LeafIterator<'_> {
        LeafIterator::new(self, Some(*start))
    }

    /// Child of `parent` in direction `dir`, with placeholders resolved
    pub(crate) fn child(&self, parent: &ParentNode, dir: u8) -> ZkTrieResult<NodeRef> {
        self.resolve(parent.child(dir))
    }

    /// Resolve a placeholder through the node reader; other nodes pass through
    pub(crate) fn resolve(&self, node: &NodeRef) -> ZkTrieResult<NodeRef> {
        match &**node {
            TreeNode::Hash(hash_node) => hash_node.resolve(|hash| self.load_node(hash)),
            _ => Ok(node.clone()),
        }
    }

    fn load_node(&self, hash: &ZkHash) -> ZkTrieResult<NodeRef> {
        let reader = self.reader.as_ref().ok_or(ZkTrieError::NodeNotFound(*hash))?;
        let blob = reader.node_blob(hash)?.ok_or(ZkTrieError::NodeNotFound(*hash))?;
        let node = TreeNode::decode(&blob).map_err(|e| {
            error!("Failed to decode node {}: {}", hash, e);
            e
        })?;
        Ok(Arc::new(node.with_hash(*hash)))
    }

    fn path(&self, key: &ZkHash) -> TreePath {
        TreePath::from_bytes(key.as_le_bytes(), self.max_levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zk::hash::HASH_BYTE_LEN;
    use crate::zk::hasher::{Hasher, KeccakHasher};
    use crate::zk::node::leaf_hash;
    use crate::zk::tree_path::{hash_to_iterator_key, LEFT, RIGHT};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::{BTreeMap, HashMap};

    fn keccak() -> SharedHasher {
        Arc::new(KeccakHasher)
    }

    /// Key whose first path bits are `bits`, the rest zero
    fn key_with_path(bits: &[u8], tail: u8) -> ZkHash {
        let mut bytes = [0u8; HASH_BYTE_LEN];
        for (n, bit) in bits.iter().enumerate() {
            if *bit == RIGHT {
                bytes[n / 8] |= 1 << (n % 8);
            }
        }
        bytes[31] = tail;
        ZkHash::from_le_bytes(bytes)
    }

    fn random_key(rng: &mut StdRng) -> ZkHash {
        ZkHash::from_le_bytes(rng.gen())
    }

    /// Root of the canonical sparse tree holding `leaves`, built from scratch
    fn reference_root(hasher: &dyn Hasher, leaves: &[(ZkHash, Vec<u8>)], level: usize) -> ZkHash {
        match leaves.len() {
            0 => ZkHash::ZERO,
            1 => {
                let leaf = LeafNode::new(leaves[0].0, &leaves[0].1).unwrap();
                let value_hash = leaf.value_hash(hasher).unwrap();
                leaf_hash(hasher, leaf.key(), &value_hash).unwrap()
            }
            _ => {
                let (left, right): (Vec<_>, Vec<_>) =
                    leaves.iter().cloned().partition(|(k, _)| !k.test_bit(level));
                let l = reference_root(hasher, &left, level + 1);
                let r = reference_root(hasher, &right, level + 1);
                hasher.hash_elems(&l.to_be_bytes(), &r.to_be_bytes(), &[]).unwrap()
            }
        }
    }

    fn depth_of(tree: &MerkleTree, key: &ZkHash) -> usize {
        let mut node = tree.root().clone();
        let path = TreePath::from_hash(key);
        let mut depth = 0;
        while let TreeNode::Parent(p) = &*node {
            node = p.child(path.get(depth)).clone();
            depth += 1;
        }
        depth
    }

    #[test]
    fn test_update_get_and_overwrite() {
        let mut tree = MerkleTree::new(keccak());
        let k1 = key_with_path(&[0, 1], 1);
        let k2 = key_with_path(&[1, 0], 2);

        tree.update(&k1, &[1]).unwrap();
        tree.update(&k2, &[2]).unwrap();
        assert_eq!(tree.get(&k1).unwrap().unwrap()[31], 1);
        assert_eq!(tree.get(&k2).unwrap().unwrap()[31], 2);
        assert_eq!(tree.get(&key_with_path(&[0, 0], 3)).unwrap(), None);

        let before = tree.hash().unwrap();
        tree.update(&k1, &[9]).unwrap();
        assert_eq!(tree.get(&k1).unwrap().unwrap()[31], 9);
        assert_ne!(tree.hash().unwrap(), before);
    }

    #[test]
    fn test_push_leaf_builds_chain() {
        let mut tree = MerkleTree::new(keccak());
        let a = key_with_path(&[0, 1, 0, 0], 1);
        let b = key_with_path(&[0, 1, 0, 1], 2);
        tree.update(&a, &[1]).unwrap();
        tree.update(&b, &[2]).unwrap();

        // Three shared bits: three single-child parents, then the fork
        let mut node = tree.root().clone();
        for level in 0..3 {
            match &*node {
                TreeNode::Parent(p) => {
                    let dir = TreePath::from_hash(&a).get(level);
                    assert!(p.child(dir ^ RIGHT).is_empty(), "level {} should be a single-child parent", level);
                    node = p.child(dir).clone();
                }
                other => panic!("expected parent at level {}, got {:?}", level, other),
            }
        }
        match &*node {
            TreeNode::Parent(p) => {
                assert!(matches!(&**p.child(LEFT), TreeNode::Leaf(l) if *l.key() == a));
                assert!(matches!(&**p.child(RIGHT), TreeNode::Leaf(l) if *l.key() == b));
            }
            other => panic!("expected fork parent, got {:?}", other),
        }
        assert_eq!(depth_of(&tree, &a), 4);

        // Removing one leaf collapses the whole chain
        tree.delete(&b).unwrap();
        assert_eq!(depth_of(&tree, &a), 0);
        assert!(matches!(&**tree.root(), TreeNode::Leaf(l) if *l.key() == a));
    }

    #[test]
    fn test_delete_collapses_under_shared_ancestor() {
        let mut tree = MerkleTree::new(keccak());
        let a = key_with_path(&[0, 0, 0, 0], 1);
        let b = key_with_path(&[0, 0, 0, 1], 2);
        let c = key_with_path(&[1], 3);
        for (k, v) in [(a, 1u8), (b, 2), (c, 3)] {
            tree.update(&k, &[v]).unwrap();
        }
        assert_eq!(depth_of(&tree, &a), 4);

        tree.delete(&b).unwrap();
        // `a` now hangs directly under the root, next to `c`
        assert_eq!(depth_of(&tree, &a), 1);
        assert_eq!(depth_of(&tree, &c), 1);
        assert!(tree.get(&b).unwrap().is_none());
        assert_eq!(tree.get(&a).unwrap().unwrap()[31], 1);
    }

    #[test]
    fn test_delete_next_to_parent_sibling() {
        let mut tree = MerkleTree::new(keccak());
        let a = key_with_path(&[0], 1);
        let b = key_with_path(&[1, 0], 2);
        let c = key_with_path(&[1, 1], 3);
        for (k, v) in [(a, 1u8), (b, 2), (c, 3)] {
            tree.update(&k, &[v]).unwrap();
        }
        tree.delete(&a).unwrap();
        assert_eq!(tree.get(&b).unwrap().unwrap()[31], 2);
        assert_eq!(tree.get(&c).unwrap().unwrap()[31], 3);

        let hasher = KeccakHasher;
        let expected = reference_root(&hasher, &[(b, vec![2]), (c, vec![3])], 0);
        assert_eq!(tree.hash().unwrap(), expected);
    }

    #[test]
    fn test_delete_missing_key() {
        let mut tree = MerkleTree::new(keccak());
        assert!(matches!(tree.delete(&key_with_path(&[0], 1)), Err(ZkTrieError::KeyNotFound)));
        tree.update(&key_with_path(&[0, 0], 1), &[1]).unwrap();
        // Same path prefix, different key
        assert!(matches!(tree.delete(&key_with_path(&[0, 0], 2)), Err(ZkTrieError::KeyNotFound)));
    }

    #[test]
    fn test_reached_max_level() {
        let mut tree = MerkleTree::new(keccak()).with_max_levels(4);
        let a = key_with_path(&[0, 1, 0, 0], 1);
        let b = key_with_path(&[0, 1, 0, 0], 2);
        tree.update(&a, &[1]).unwrap();
        assert!(matches!(tree.update(&b, &[2]), Err(ZkTrieError::ReachedMaxLevel)));
        // The failed insert leaves the tree untouched
        assert_eq!(tree.get(&a).unwrap().unwrap()[31], 1);
    }

    #[test]
    fn test_no_op_update_keeps_hashes() {
        let mut tree = MerkleTree::new(keccak());
        let mut rng = StdRng::seed_from_u64(7);
        let keys: Vec<ZkHash> = (0..32).map(|_| random_key(&mut rng)).collect();
        for (i, k) in keys.iter().enumerate() {
            tree.update(k, &[i as u8]).unwrap();
        }
        let root = tree.hash().unwrap();
        let root_node = tree.root().clone();

        tree.update(&keys[5], &[5]).unwrap();
        assert!(Arc::ptr_eq(&root_node, tree.root()));
        let mut dirty = 0;
        let again = tree.compute_all_hashes(&mut |_| { dirty += 1; Ok(()) }).unwrap();
        assert_eq!(again, root);
        assert_eq!(dirty, 0);
    }

    #[test]
    fn test_dirty_nodes_reported_once() {
        let mut tree = MerkleTree::new(keccak());
        let mut rng = StdRng::seed_from_u64(8);
        for i in 0..16u8 {
            tree.update(&random_key(&mut rng), &[i]).unwrap();
        }
        let mut first = 0;
        tree.compute_all_hashes(&mut |_| { first += 1; Ok(()) }).unwrap();
        // 16 leaves and at least 15 parents
        assert!(first >= 31);

        tree.update(&random_key(&mut rng), &[99]).unwrap();
        let mut second = 0;
        tree.compute_all_hashes(&mut |_| { second += 1; Ok(()) }).unwrap();
        // Only the new leaf and the rebuilt path are dirty
        assert!(second >= 2 && second < first);
    }

    #[test]
    fn test_matches_reference_tree() {
        let hasher = KeccakHasher;
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..20 {
            let mut tree = MerkleTree::new(keccak());
            let mut expected: HashMap<ZkHash, Vec<u8>> = HashMap::new();
            let mut keys = Vec::new();
            for _ in 0..rng.gen_range(0..60) {
                if !keys.is_empty() && rng.gen_bool(0.3) {
                    let idx = rng.gen_range(0..keys.len());
                    let key: ZkHash = keys.swap_remove(idx);
                    tree.delete(&key).unwrap();
                    expected.remove(&key);
                } else {
                    let key = if !keys.is_empty() && rng.gen_bool(0.2) {
                        keys[rng.gen_range(0..keys.len())]
                    } else {
                        let k = random_key(&mut rng);
                        keys.push(k);
                        k
                    };
                    let value = vec![rng.gen::<u8>() | 1; 32];
                    tree.update(&key, &value).unwrap();
                    expected.insert(key, value);
                }
            }
            let leaves: Vec<_> = expected.into_iter().collect();
            assert_eq!(tree.hash().unwrap(), reference_root(&hasher, &leaves, 0), "round {}", round);
        }
    }

    #[test]
    fn test_delete_everything_returns_to_empty_root() {
        let mut tree = MerkleTree::new(keccak());
        let mut rng = StdRng::seed_from_u64(3);
        let keys: Vec<ZkHash> = (0..100).map(|_| random_key(&mut rng)).collect();
        for k in &keys {
            tree.update(k, k.as_le_bytes()).unwrap();
        }
        for k in &keys {
            tree.delete(k).unwrap();
            assert_eq!(tree.get(k).unwrap(), None);
        }
        assert_eq!(tree.hash().unwrap(), ZkHash::ZERO);
        assert!(tree.root().is_empty());
    }

    #[test]
    fn test_iteration_is_sorted() {
        let mut tree = MerkleTree::new(keccak());
        let mut rng = StdRng::seed_from_u64(11);
        let mut expected = BTreeMap::new();
        for i in 0..200u32 {
            let key = random_key(&mut rng);
            tree.update(&key, &i.to_be_bytes()).unwrap();
            expected.insert(hash_to_iterator_key(&key), key);
        }
        let visited: Vec<[u8; 32]> = tree.iter().map(|r| r.unwrap().0).collect();
        assert_eq!(visited, expected.keys().cloned().collect::<Vec<_>>());
        assert!(visited.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_persisted_tree_resolves_lazily() {
        let hasher = keccak();
        let mut tree = MerkleTree::new(hasher.clone());
        let mut rng = StdRng::seed_from_u64(5);
        let keys: Vec<ZkHash> = (0..50).map(|_| random_key(&mut rng)).collect();
        for k in &keys {
            tree.update(k, &[1, 2, 3]).unwrap();
        }
        let mut db: HashMap<ZkHash, Vec<u8>> = HashMap::new();
        let root = tree
            .compute_all_hashes(&mut |node| {
                db.insert(node.cached_hash().unwrap(), node.encode()?);
                Ok(())
            })
            .unwrap();

        let reader: Arc<dyn NodeReader> = Arc::new(db);
        let mut loaded = MerkleTree::from_root(root, reader, hasher).unwrap();
        assert_eq!(loaded.hash().unwrap(), root);
        for k in &keys {
            assert_eq!(loaded.get(k).unwrap().unwrap()[29..], [1, 2, 3]);
        }

        // Mutating a loaded tree only re-hashes the touched path
        loaded.delete(&keys[0]).unwrap();
        tree.delete(&keys[0]).unwrap();
        assert_eq!(loaded.hash().unwrap(), tree.hash().unwrap());
    }

    #[test]
    fn test_missing_node_is_an_error() {
        let reader: Arc<dyn NodeReader> = Arc::new(HashMap::<ZkHash, Vec<u8>>::new());
        let result = MerkleTree::from_root(ZkHash::from_le_bytes([1u8; 32]), reader, keccak());
        assert!(matches!(result, Err(ZkTrieError::NodeNotFound(_))));
    }
}

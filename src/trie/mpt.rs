//! Merkle Patricia Trie over a [`MptDatabase`].
//!
//! Nodes are owned by their parent and rebuilt on mutation. Subtrees that
//! have not been touched stay as [`Node::Hash`] references and are loaded
//! from the database on demand.

use log::trace;
use std::sync::Arc;

use super::database::{MptDatabase, NodeSet};
use super::encode::{bytes_to_nibbles, nibbles_to_bytes, prefix_len, Nibble};
use super::node::{ChildRef, Node};
use super::{keccak256, TrieError, TrieResult, EMPTY_ROOT};
use crate::storage::block_store::Hash;

/// Merkle Patricia Trie implementation
pub struct MerklePatriciaTrie {
    root: Node,
    db: Arc<MptDatabase>,
}

impl MerklePatriciaTrie {
    /// Open the trie with root `root`
    pub fn new(root: Hash, db: Arc<MptDatabase>) -> Self {
        let root = if root == EMPTY_ROOT { Node::Empty } else { Node::Hash(root) };
        Self { root, db }
    }

    /// The node database
    pub fn database(&self) -> &Arc<MptDatabase> {
        &self.db
    }

    /// Get a value from the trie
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let nibbles = bytes_to_nibbles(key);
        self.get_at(&self.root, &nibbles)
    }

    fn get_at(&self, node: &Node, key: &[Nibble]) -> TrieResult<Option<Vec<u8>>> {
        match node {
            Node::Empty => Ok(None),
            Node::Leaf { path, value, .. } => Ok(if path.as_slice() == key { Some(value.clone()) } else { None }),
            Node::Extension { path, child, .. } => {
                if key.len() < path.len() || &key[..path.len()] != path.as_slice() {
                    return Ok(None);
                }
                self.get_at(child, &key[path.len()..])
            }
            Node::Branch { children, value, .. } => match key.split_first() {
                None => Ok(value.clone()),
                Some((nibble, rest)) => self.get_at(&children[*nibble as usize], rest),
            },
            Node::Hash(hash) => {
                let resolved = self.load(hash)?;
                self.get_at(&resolved, key)
            }
        }
    }

    /// Insert a key-value pair. An empty value deletes the key.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> TrieResult<()> {
        if value.is_empty() {
            return self.delete(key);
        }
        let nibbles = bytes_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        let (_, root) = self.insert_at(root, &nibbles, value)?;
        self.root = root;
        Ok(())
    }

    /// Returns whether the subtree changed together with the new subtree
    fn insert_at(&self, node: Node, key: &[Nibble], value: Vec<u8>) -> TrieResult<(bool, Node)> {
        match node {
            Node::Empty => Ok((true, Node::leaf(key.to_vec(), value))),

            Node::Leaf { path, value: old_value, flags } => {
                if path.as_slice() == key {
                    if old_value == value {
                        return Ok((false, Node::Leaf { path, value: old_value, flags }));
                    }
                    return Ok((true, Node::leaf(path, value)));
                }
                // Split the leaf at the end of the common prefix
                let common = prefix_len(&path, key);
                let mut branch = Node::empty_branch();
                place(&mut branch, &path[common..], old_value);
                place(&mut branch, &key[common..], value);
                Ok((true, wrap(&key[..common], branch)))
            }

            Node::Extension { path, child, flags } => {
                let common = prefix_len(&path, key);
                if common == path.len() {
                    let (dirty, new_child) = self.insert_at(*child, &key[common..], value)?;
                    if !dirty {
                        return Ok((false, Node::Extension { path, child: Box::new(new_child), flags }));
                    }
                    return Ok((true, Node::extension(path, new_child)));
                }

                // The keys diverge inside the extension
                let mut branch = Node::empty_branch();
                if let Node::Branch { children, .. } = &mut branch {
                    let old_rest = &path[common + 1..];
                    children[path[common] as usize] =
                        if old_rest.is_empty() { *child } else { Node::extension(old_rest.to_vec(), *child) };
                }
                place(&mut branch, &key[common..], value);
                Ok((true, wrap(&key[..common], branch)))
            }

            Node::Branch { mut children, value: branch_value, flags } => match key.split_first() {
                None => {
                    if branch_value.as_ref() == Some(&value) {
                        return Ok((false, Node::Branch { children, value: branch_value, flags }));
                    }
                    Ok((true, Node::branch(children, Some(value))))
                }
                Some((nibble, rest)) => {
                    let idx = *nibble as usize;
                    let child = std::mem::replace(&mut children[idx], Node::Empty);
                    let (dirty, new_child) = self.insert_at(child, rest, value)?;
                    children[idx] = new_child;
                    if !dirty {
                        return Ok((false, Node::Branch { children, value: branch_value, flags }));
                    }
                    Ok((true, Node::branch(children, branch_value)))
                }
            },

            Node::Hash(hash) => {
                let resolved = self.load(&hash)?;
                let (dirty, node) = self.insert_at(resolved, key, value)?;
                Ok((dirty, if dirty { node } else { Node::Hash(hash) }))
            }
        }
    }

    /// Delete a key. Missing keys are ignored.
    pub fn delete(&mut self, key: &[u8]) -> TrieResult<()> {
        let nibbles = bytes_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        let (_, root) = self.delete_at(root, &nibbles)?;
        self.root = root;
        Ok(())
    }

    fn delete_at(&self, node: Node, key: &[Nibble]) -> TrieResult<(bool, Node)> {
        match node {
            Node::Empty => Ok((false, Node::Empty)),

            Node::Leaf { path, value, flags } => {
                if path.as_slice() == key {
                    return Ok((true, Node::Empty));
                }
                Ok((false, Node::Leaf { path, value, flags }))
            }

            Node::Extension { path, child, flags } => {
                if key.len() < path.len() || key[..path.len()] != path[..] {
                    return Ok((false, Node::Extension { path, child, flags }));
                }
                let (dirty, new_child) = self.delete_at(*child, &key[path.len()..])?;
                if !dirty {
                    return Ok((false, Node::Extension { path, child: Box::new(new_child), flags }));
                }
                Ok((true, merge_prefix(path, new_child)))
            }

            Node::Branch { mut children, value, flags } => {
                let value = match key.split_first() {
                    None => {
                        if value.is_none() {
                            return Ok((false, Node::Branch { children, value, flags }));
                        }
                        None
                    }
                    Some((nibble, rest)) => {
                        let idx = *nibble as usize;
                        let child = std::mem::replace(&mut children[idx], Node::Empty);
                        let (dirty, new_child) = self.delete_at(child, rest)?;
                        children[idx] = new_child;
                        if !dirty {
                            return Ok((false, Node::Branch { children, value, flags }));
                        }
                        value
                    }
                };
                Ok((true, self.simplify_branch(children, value)?))
            }

            Node::Hash(hash) => {
                let resolved = self.load(&hash)?;
                let (dirty, node) = self.delete_at(resolved, key)?;
                Ok((dirty, if dirty { node } else { Node::Hash(hash) }))
            }
        }
    }

    /// Collapse a branch left with fewer than two entries
    fn simplify_branch(&self, mut children: Box<[Node; 16]>, value: Option<Vec<u8>>) -> TrieResult<Node> {
        let occupied: Vec<usize> = (0..16).filter(|i| !children[*i].is_empty()).collect();
        match (occupied.len(), value) {
            (0, None) => Ok(Node::Empty),
            (0, Some(value)) => Ok(Node::leaf(Vec::new(), value)),
            (1, None) => {
                let idx = occupied[0];
                let child = std::mem::replace(&mut children[idx], Node::Empty);
                let child = match child {
                    Node::Hash(hash) => self.load(&hash)?,
                    other => other,
                };
                Ok(merge_prefix(vec![idx as Nibble], child))
            }
            (_, value) => Ok(Node::branch(children, value)),
        }
    }

    /// Root hash without writing anything
    pub fn hash(&mut self) -> TrieResult<Hash> {
        let mut root = std::mem::replace(&mut self.root, Node::Empty);
        let result = hash_root(&mut root, &mut Vec::new(), None);
        self.root = root;
        result
    }

    /// Hash every changed node and return the new root with the set of
    /// nodes to persist
    pub fn commit(&mut self, owner: Option<Hash>) -> TrieResult<(Hash, NodeSet)> {
        let mut set = NodeSet::new(owner);
        let mut root = std::mem::replace(&mut self.root, Node::Empty);
        let result = hash_root(&mut root, &mut Vec::new(), Some(&mut set));
        self.root = root;
        let hash = result?;
        trace!("Committed MPT root {} with {} nodes", hex::encode(hash), set.len());
        Ok((hash, set))
    }

    /// Visit every key-value pair in key order
    pub fn for_each_leaf(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> TrieResult<()>) -> TrieResult<()> {
        let mut path = Vec::new();
        self.walk(&self.root, &mut path, visit)
    }

    fn walk(
        &self,
        node: &Node,
        path: &mut Vec<Nibble>,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> TrieResult<()>,
    ) -> TrieResult<()> {
        match node {
            Node::Empty => Ok(()),
            Node::Leaf { path: rest, value, .. } => {
                let len = path.len();
                path.extend_from_slice(rest);
                let result = visit(&nibbles_to_bytes(path), value);
                path.truncate(len);
                result
            }
            Node::Extension { path: rest, child, .. } => {
                let len = path.len();
                path.extend_from_slice(rest);
                let result = self.walk(child, path, visit);
                path.truncate(len);
                result
            }
            Node::Branch { children, value, .. } => {
                if let Some(value) = value {
                    visit(&nibbles_to_bytes(path), value)?;
                }
                for (i, child) in children.iter().enumerate() {
                    path.push(i as Nibble);
                    let result = self.walk(child, path, visit);
                    path.pop();
                    result?;
                }
                Ok(())
            }
            Node::Hash(hash) => {
                let resolved = self.load(hash)?;
                self.walk(&resolved, path, visit)
            }
        }
    }

    fn load(&self, hash: &Hash) -> TrieResult<Node> {
        let blob = self.db.node(hash)?.ok_or(TrieError::MissingNode(*hash))?;
        Node::decode(&blob, Some(*hash))
    }
}

/// Put `value` into a branch under `rest`
fn place(branch: &mut Node, rest: &[Nibble], value: Vec<u8>) {
    if let Node::Branch { children, value: branch_value, .. } = branch {
        match rest.split_first() {
            None => *branch_value = Some(value),
            Some((nibble, tail)) => children[*nibble as usize] = Node::leaf(tail.to_vec(), value),
        }
    }
}

/// Wrap `node` in an extension unless `prefix` is empty
fn wrap(prefix: &[Nibble], node: Node) -> Node {
    if prefix.is_empty() {
        node
    } else {
        Node::extension(prefix.to_vec(), node)
    }
}

/// Prepend `prefix` to a node that lost its parent branch or extension
fn merge_prefix(mut prefix: Vec<Nibble>, node: Node) -> Node {
    match node {
        Node::Empty => Node::Empty,
        Node::Leaf { path, value, .. } => {
            prefix.extend(path);
            Node::leaf(prefix, value)
        }
        Node::Extension { path, child, .. } => {
            prefix.extend(path);
            Node::extension(prefix, *child)
        }
        other => Node::extension(prefix, other),
    }
}

/// Hash the root, which is always referenced by hash even when short
fn hash_root(root: &mut Node, path: &mut Vec<Nibble>, set: Option<&mut NodeSet>) -> TrieResult<Hash> {
    let mut set = set;
    match root {
        Node::Empty => Ok(EMPTY_ROOT),
        Node::Hash(hash) => Ok(*hash),
        _ => {
            let (hash, encoded) = match hash_node(root, path, set.as_deref_mut())? {
                ChildRef::Hash(hash) => return Ok(hash),
                ChildRef::Inline(encoded) => (keccak256(&encoded), encoded),
            };
            let committing = set.is_some();
            if let Some(set) = set {
                set.add(path.clone(), hash, encoded);
            }
            if let Some(flags) = root.flags_mut() {
                flags.hash = Some(hash);
                if committing {
                    flags.dirty = false;
                }
            }
            Ok(hash)
        }
    }
}

/// Compute the reference of `node`, caching digests and collecting dirty
/// nodes into `set` when committing
fn hash_node(node: &mut Node, path: &mut Vec<Nibble>, mut set: Option<&mut NodeSet>) -> TrieResult<ChildRef> {
    let committing = set.is_some();
    if let Some(flags) = node.flags() {
        if let Some(hash) = flags.hash {
            if !committing || !flags.dirty {
                return Ok(ChildRef::Hash(hash));
            }
        }
    }

    match node {
        Node::Empty => return Ok(ChildRef::Inline(vec![0x80])),
        Node::Hash(hash) => return Ok(ChildRef::Hash(*hash)),
        Node::Extension { path: rest, child, .. } => {
            let len = path.len();
            path.extend_from_slice(rest);
            let result = hash_node(child, path, set.as_deref_mut());
            path.truncate(len);
            let child_ref = result?;
            // A hashed child is referenced by digest from now on
            if let ChildRef::Hash(hash) = child_ref {
                if committing {
                    **child = Node::Hash(hash);
                }
            }
        }
        Node::Branch { children, .. } => {
            for (i, child) in children.iter_mut().enumerate() {
                path.push(i as Nibble);
                let result = hash_node(child, path, set.as_deref_mut());
                path.pop();
                if let ChildRef::Hash(hash) = result? {
                    if committing {
                        *child = Node::Hash(hash);
                    }
                }
            }
        }
        Node::Leaf { .. } => {}
    }

    let dirty = node.flags().map(|f| f.dirty).unwrap_or(false);
    let encoded = node.encode()?;
    let reference = ChildRef::from_encoding(encoded.clone());
    if let ChildRef::Hash(hash) = &reference {
        if let (true, Some(set)) = (dirty, set) {
            set.add(path.clone(), *hash, encoded);
        }
        if let Some(flags) = node.flags_mut() {
            flags.hash = Some(*hash);
            if committing {
                flags.dirty = false;
            }
        }
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv_store::{KVStore, MemoryStore};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn database() -> (Arc<dyn KVStore>, Arc<MptDatabase>) {
        let store: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        let db = Arc::new(MptDatabase::new(store.clone()));
        (store, db)
    }

    fn hex32(s: &str) -> Hash {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }

    #[test]
    fn test_empty_trie() {
        let (_, db) = database();
        let mut trie = MerklePatriciaTrie::new(EMPTY_ROOT, db);
        assert_eq!(trie.hash().unwrap(), EMPTY_ROOT);
        assert_eq!(trie.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_known_roots() {
        let (_, db) = database();
        let mut trie = MerklePatriciaTrie::new(EMPTY_ROOT, db.clone());
        trie.insert(b"doe", b"reindeer".to_vec()).unwrap();
        trie.insert(b"dog", b"puppy".to_vec()).unwrap();
        trie.insert(b"dogglesworth", b"cat".to_vec()).unwrap();
        assert_eq!(
            trie.hash().unwrap(),
            hex32("8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3")
        );

        // Committing yields the same root as hashing
        let (root, set) = trie.commit(None).unwrap();
        assert_eq!(root, hex32("8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3"));
        assert!(set.iter().any(|(path, node)| path.is_empty() && node.hash == root));
    }

    #[test]
    fn test_insert_get_delete() {
        let (_, db) = database();
        let mut trie = MerklePatriciaTrie::new(EMPTY_ROOT, db);
        trie.insert(b"do", b"verb".to_vec()).unwrap();
        trie.insert(b"dog", b"puppy".to_vec()).unwrap();
        trie.insert(b"doge", b"coin".to_vec()).unwrap();
        trie.insert(b"horse", b"stallion".to_vec()).unwrap();
        assert_eq!(trie.get(b"dog").unwrap(), Some(b"puppy".to_vec()));
        assert_eq!(trie.get(b"do").unwrap(), Some(b"verb".to_vec()));
        assert_eq!(trie.get(b"d").unwrap(), None);

        let full = trie.hash().unwrap();
        trie.insert(b"dodo", b"bird".to_vec()).unwrap();
        trie.delete(b"dodo").unwrap();
        assert_eq!(trie.hash().unwrap(), full);

        for key in [&b"do"[..], b"dog", b"doge", b"horse"] {
            trie.delete(key).unwrap();
        }
        assert_eq!(trie.hash().unwrap(), EMPTY_ROOT);
    }

    #[test]
    fn test_commit_reopen_and_mutate() {
        let (store, db) = database();
        let mut rng = StdRng::seed_from_u64(9);
        let mut expected = BTreeMap::new();
        let mut trie = MerklePatriciaTrie::new(EMPTY_ROOT, db.clone());
        for _ in 0..300 {
            let key: [u8; 32] = rng.gen();
            let value = vec![rng.gen_range(1..=255u8); rng.gen_range(1..40)];
            trie.insert(&key, value.clone()).unwrap();
            expected.insert(key.to_vec(), value);
        }
        let (root, set) = trie.commit(None).unwrap();
        assert!(!set.is_empty());
        db.update(&set);
        store.write_batch(db.flush_ops()).unwrap();

        let mut reopened = MerklePatriciaTrie::new(root, db.clone());
        for (key, value) in &expected {
            assert_eq!(reopened.get(key).unwrap().as_ref(), Some(value));
        }

        let mut visited = Vec::new();
        reopened
            .for_each_leaf(&mut |key, value| {
                visited.push((key.to_vec(), value.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, expected.clone().into_iter().collect::<Vec<_>>());

        // Re-inserting existing values commits nothing
        let (key, value) = expected.iter().next().unwrap();
        reopened.insert(key, value.clone()).unwrap();
        let (same_root, empty) = reopened.commit(None).unwrap();
        assert_eq!(same_root, root);
        assert!(empty.is_empty());

        // A real change writes only the touched path
        reopened.delete(key).unwrap();
        let (new_root, changed) = reopened.commit(None).unwrap();
        assert_ne!(new_root, root);
        assert!(changed.len() < 10);
    }

    #[test]
    fn test_order_independence() {
        let (_, db) = database();
        let mut rng = StdRng::seed_from_u64(10);
        let pairs: Vec<([u8; 32], Vec<u8>)> = (0..100).map(|_| (rng.gen(), vec![rng.gen_range(1..=255u8); 33])).collect();

        let mut forward = MerklePatriciaTrie::new(EMPTY_ROOT, db.clone());
        for (k, v) in &pairs {
            forward.insert(k, v.clone()).unwrap();
        }
        let mut backward = MerklePatriciaTrie::new(EMPTY_ROOT, db);
        for (k, v) in pairs.iter().rev() {
            backward.insert(k, v.clone()).unwrap();
        }
        assert_eq!(forward.hash().unwrap(), backward.hash().unwrap());
    }

    #[test]
    fn test_missing_node() {
        let (_, db) = database();
        let trie = MerklePatriciaTrie::new([5u8; 32], db);
        assert!(matches!(trie.get(b"key"), Err(TrieError::MissingNode(_))));
    }
}

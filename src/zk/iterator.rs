//! Ordered leaf iteration.

use super::hash::HASH_BYTE_LEN;
use super::node::{LeafNode, NodeRef, TreeNode};
use super::tree::MerkleTree;
use super::tree_path::{hash_to_iterator_key, LEFT, RIGHT};
use super::ZkTrieResult;

/// Depth-first walk over the leaves of a tree in ascending iterator-key
/// order. With a start key, subtrees entirely below it are never loaded.
pub struct LeafIterator<'a> {
    tree: &'a MerkleTree,
    start: Option<[u8; HASH_BYTE_LEN]>,
    // (node, level, whether the node lies on the path of `start`)
    stack: Vec<(NodeRef, usize, bool)>,
    failed: bool,
}

impl<'a> LeafIterator<'a> {
    pub(crate) fn new(tree: &'a MerkleTree, start: Option<[u8; HASH_BYTE_LEN]>) -> Self {
        Self {
            tree,
            start,
            stack: vec![(tree.root().clone(), 0, start.is_some())],
            failed: false,
        }
    }

    fn start_bit(&self, level: usize) -> u8 {
        match &self.start {
            Some(start) if level < HASH_BYTE_LEN * 8 => (start[level / 8] >> (7 - level % 8)) & 1,
            _ => LEFT,
        }
    }

    fn step(&mut self) -> ZkTrieResult<Option<([u8; HASH_BYTE_LEN], LeafNode)>> {
        while let Some((node, level, on_start_path)) = self.stack.pop() {
            let node = self.tree.resolve(&node)?;
            match &*node {
                TreeNode::Empty | TreeNode::Hash(_) => {}
                TreeNode::Leaf(leaf) => {
                    let key = hash_to_iterator_key(leaf.key());
                    if let Some(start) = &self.start {
                        if on_start_path && key < *start {
                            continue;
                        }
                    }
                    return Ok(Some((key, leaf.clone())));
                }
                TreeNode::Parent(parent) => {
                    let right = parent.child(RIGHT).clone();
                    let left = parent.child(LEFT).clone();
                    if !on_start_path {
                        self.stack.push((right, level + 1, false));
                        self.stack.push((left, level + 1, false));
                    } else if self.start_bit(level) == LEFT {
                        self.stack.push((right, level + 1, false));
                        self.stack.push((left, level + 1, true));
                    } else {
                        self.stack.push((right, level + 1, true));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl<'a> Iterator for LeafIterator<'a> {
    type Item = ZkTrieResult<([u8; HASH_BYTE_LEN], LeafNode)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

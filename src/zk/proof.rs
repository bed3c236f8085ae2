//! Merkle proofs of inclusion and absence.

use log::debug;

use super::database::NodeReader;
use super::hash::{set_bit_big_endian, test_bit_big_endian, ZkHash, HASH_BYTE_LEN};
use super::hasher::Hasher;
use super::node::{leaf_hash, LeafNode, TreeNode};
use super::tree_path::{TreePath, LEFT, RIGHT};
use super::{ZkTrieError, ZkTrieResult};

/// The leaf found in place of the requested key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAux {
    pub key: ZkHash,
    pub value_hash: ZkHash,
}

/// A path from the root to the slot of a key
#[derive(Debug, Clone)]
pub struct Proof {
    /// Whether the key is in the tree
    pub existence: bool,
    /// Number of parents between the root and the terminal node
    pub depth: usize,
    /// Bit `n` is set when the sibling at level `n` is not empty
    pub notempties: [u8; HASH_BYTE_LEN],
    /// Non-empty siblings, root side first
    pub siblings: Vec<ZkHash>,
    /// Terminal leaf holding another key, for absence proofs
    pub node_aux: Option<NodeAux>,
    /// Terminal leaf holding the key, for inclusion proofs
    pub leaf: Option<LeafNode>,
}

impl Proof {
    /// Collect the proof for `key` from the nodes in `reader`
    pub fn build(
        reader: &dyn NodeReader,
        hasher: &dyn Hasher,
        root: &ZkHash,
        key: &ZkHash,
        max_levels: usize,
    ) -> ZkTrieResult<Self> {
        let path = TreePath::from_bytes(key.as_le_bytes(), max_levels);
        let mut proof = Proof {
            existence: false,
            depth: 0,
            notempties: [0u8; HASH_BYTE_LEN],
            siblings: Vec::new(),
            node_aux: None,
            leaf: None,
        };

        let mut hash = *root;
        loop {
            if hash.is_zero() {
                return Ok(proof);
            }
            let blob = reader.node_blob(&hash)?.ok_or(ZkTrieError::NodeNotFound(hash))?;
            match TreeNode::decode(&blob)? {
                TreeNode::Parent(parent) => {
                    let level = proof.depth;
                    if level >= path.len() {
                        return Err(ZkTrieError::ReachedMaxLevel);
                    }
                    let dir = path.get(level);
                    let sibling = parent.child(dir ^ RIGHT).cached_hash().ok_or(ZkTrieError::HashNotComputed)?;
                    if !sibling.is_zero() {
                        set_bit_big_endian(&mut proof.notempties, level);
                        proof.siblings.push(sibling);
                    }
                    hash = parent.child(dir).cached_hash().ok_or(ZkTrieError::HashNotComputed)?;
                    proof.depth += 1;
                }
                TreeNode::Leaf(leaf) => {
                    if leaf.key() == key {
                        proof.existence = true;
                        proof.leaf = Some(leaf);
                    } else {
                        proof.node_aux = Some(NodeAux {
                            key: *leaf.key(),
                            value_hash: leaf.value_hash(hasher)?,
                        });
                    }
                    return Ok(proof);
                }
                TreeNode::Empty => return Ok(proof),
                TreeNode::Hash(_) => return Err(ZkTrieError::InvalidNodeType(blob[0])),
            }
        }
    }

    /// Root implied by this proof for `key`
    pub fn compute_root(&self, hasher: &dyn Hasher, key: &ZkHash) -> ZkTrieResult<ZkHash> {
        let mut node = match (&self.leaf, &self.node_aux) {
            (Some(leaf), _) if self.existence => leaf_hash(hasher, leaf.key(), &leaf.value_hash(hasher)?)?,
            (_, Some(aux)) => leaf_hash(hasher, &aux.key, &aux.value_hash)?,
            _ => ZkHash::ZERO,
        };

        let path = TreePath::from_hash(key);
        let mut siblings = self.siblings.iter().rev();
        for level in (0..self.depth).rev() {
            let sibling = if test_bit_big_endian(&self.notempties, level) {
                *siblings
                    .next()
                    .ok_or_else(|| ZkTrieError::InvalidProof(format!("missing sibling at level {}", level)))?
            } else {
                ZkHash::ZERO
            };
            let (left, right) = if path.get(level) == LEFT { (node, sibling) } else { (sibling, node) };
            node = hasher.hash_elems(&left.to_be_bytes(), &right.to_be_bytes(), &[])?;
        }
        if siblings.next().is_some() {
            return Err(ZkTrieError::InvalidProof("unused siblings".to_string()));
        }
        Ok(node)
    }

    /// Check this proof against `root`. Returns the leaf for an inclusion
    /// proof and `None` for a valid absence proof.
    pub fn verify(&self, hasher: &dyn Hasher, root: &ZkHash, key: &ZkHash) -> ZkTrieResult<Option<LeafNode>> {
        if let Some(aux) = &self.node_aux {
            // The other leaf must sit on the path of the requested key
            let aux_path = TreePath::from_hash(&aux.key);
            let path = TreePath::from_hash(key);
            if aux.key == *key || (0..self.depth).any(|level| aux_path.get(level) != path.get(level)) {
                return Err(ZkTrieError::InvalidProof(format!("auxiliary leaf {} is off the path", aux.key)));
            }
        }

        let computed = self.compute_root(hasher, key)?;
        if computed != *root {
            debug!("Proof for {} leads to {}, expected {}", key, computed, root);
            return Err(ZkTrieError::InvalidProof(format!(
                "computed root {} does not match {}",
                computed, root
            )));
        }
        Ok(if self.existence { self.leaf.clone() } else { None })
    }
}

/// Verify that the nodes in `proof_db` prove `key` against `root`.
///
/// Node digests are recomputed from their contents, so a database holding
/// forged nodes under honest digests fails verification.
pub fn verify_proof(
    hasher: &dyn Hasher,
    root: &ZkHash,
    key: &ZkHash,
    proof_db: &dyn NodeReader,
    max_levels: usize,
) -> ZkTrieResult<Option<LeafNode>> {
    let proof = Proof::build(proof_db, hasher, root, key, max_levels)?;
    proof.verify(hasher, root, key)
}

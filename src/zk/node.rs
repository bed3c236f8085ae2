//! Tree node model and its canonical byte encoding.

use byteorder::{ByteOrder, LittleEndian};
use once_cell::sync::{Lazy, OnceCell};
use std::fmt;
use std::sync::Arc;

use super::hash::{byte32_from_bytes, byte32_from_u64, Byte32, ZkHash, HASH_BYTE_LEN};
use super::hasher::Hasher;
use super::tree_path::LEFT;
use super::{ZkTrieError, ZkTrieResult};

/// Tag of an encoded parent node
pub const NODE_TYPE_PARENT: u8 = 0;
/// Tag of an encoded leaf node
pub const NODE_TYPE_LEAF: u8 = 1;
/// Tag of an encoded empty node
pub const NODE_TYPE_EMPTY: u8 = 2;
/// Tag of a hash placeholder, only used for display
pub const NODE_TYPE_HASH: u8 = 9;

/// Maximum number of value words in a leaf
pub const MAX_VALUE_WORDS: usize = 255;

/// Shared, immutable reference to a node
pub type NodeRef = Arc<TreeNode>;

static EMPTY_NODE: Lazy<NodeRef> = Lazy::new(|| Arc::new(TreeNode::Empty));

/// A node of the sparse Merkle tree
pub enum TreeNode {
    /// Canonical empty subtree
    Empty,
    /// Inner node with two children
    Parent(ParentNode),
    /// Key/value leaf
    Leaf(LeafNode),
    /// Subtree known only by its digest
    Hash(HashNode),
}

/// Inner node
#[derive(Clone)]
pub struct ParentNode {
    left: NodeRef,
    right: NodeRef,
    hash: OnceCell<ZkHash>,
}

/// Leaf holding the tree key and the value words
#[derive(Debug, Clone)]
pub struct LeafNode {
    key: ZkHash,
    value_preimage: Vec<Byte32>,
    compressed_flags: u32,
    value_hash: OnceCell<ZkHash>,
    hash: OnceCell<ZkHash>,
}

/// Placeholder for a subtree that has not been loaded.
///
/// The decoded node is memoized so every holder of this placeholder shares
/// one resolution.
pub struct HashNode {
    hash: ZkHash,
    resolved: OnceCell<NodeRef>,
}

/// Split a value into leaf words and compression flags
pub fn marshal_bytes(data: &[u8]) -> ZkTrieResult<(u32, Vec<Byte32>)> {
    if data.len() <= HASH_BYTE_LEN {
        return Ok((1, vec![byte32_from_bytes(data)]));
    }
    let flags = match data.len() {
        128 => 4,
        160 => 8,
        len => return Err(ZkTrieError::UnexpectedValueLength(len)),
    };
    Ok((flags, data.chunks(HASH_BYTE_LEN).map(byte32_from_bytes).collect()))
}

impl TreeNode {
    /// The shared empty node
    pub fn empty() -> NodeRef {
        EMPTY_NODE.clone()
    }

    /// A placeholder for `hash`; the zero digest is the empty node
    pub fn from_hash(hash: ZkHash) -> NodeRef {
        if hash.is_zero() {
            return Self::empty();
        }
        Arc::new(TreeNode::Hash(HashNode { hash, resolved: OnceCell::new() }))
    }

    /// Whether this is the empty node
    pub fn is_empty(&self) -> bool {
        matches!(self, TreeNode::Empty)
    }

    /// The digest if already known
    pub fn cached_hash(&self) -> Option<ZkHash> {
        match self {
            TreeNode::Empty => Some(ZkHash::ZERO),
            TreeNode::Hash(node) => Some(node.hash),
            TreeNode::Parent(node) => node.hash.get().copied(),
            TreeNode::Leaf(node) => node.hash.get().copied(),
        }
    }

    /// Compute the digest of this node and every node below it that lacks
    /// one. `on_dirty` runs once for each node whose digest was computed
    /// here, after its children.
    pub fn compute_hash(
        &self,
        hasher: &dyn Hasher,
        on_dirty: &mut dyn FnMut(&TreeNode) -> ZkTrieResult<()>,
    ) -> ZkTrieResult<ZkHash> {
        match self {
            TreeNode::Empty => Ok(ZkHash::ZERO),
            TreeNode::Hash(node) => Ok(node.hash),
            TreeNode::Parent(node) => {
                if let Some(hash) = node.hash.get() {
                    return Ok(*hash);
                }
                let left = node.left.compute_hash(hasher, on_dirty)?;
                let right = node.right.compute_hash(hasher, on_dirty)?;
                let hash = hasher.hash_elems(&left.to_be_bytes(), &right.to_be_bytes(), &[])?;
                let _ = node.hash.set(hash);
                on_dirty(self)?;
                Ok(hash)
            }
            TreeNode::Leaf(node) => {
                if let Some(hash) = node.hash.get() {
                    return Ok(*hash);
                }
                let hash = node.compute_leaf_hash(hasher)?;
                let _ = node.hash.set(hash);
                on_dirty(self)?;
                Ok(hash)
            }
        }
    }

    /// Canonical encoding. Parents need both child digests.
    pub fn encode(&self) -> ZkTrieResult<Vec<u8>> {
        match self {
            TreeNode::Empty => Ok(vec![NODE_TYPE_EMPTY]),
            TreeNode::Parent(node) => {
                let left = node.left.cached_hash().ok_or(ZkTrieError::HashNotComputed)?;
                let right = node.right.cached_hash().ok_or(ZkTrieError::HashNotComputed)?;
                let mut out = Vec::with_capacity(1 + 2 * HASH_BYTE_LEN);
                out.push(NODE_TYPE_PARENT);
                out.extend_from_slice(&left.to_be_bytes());
                out.extend_from_slice(&right.to_be_bytes());
                Ok(out)
            }
            TreeNode::Leaf(node) => Ok(node.encode_with_preimage(None)),
            TreeNode::Hash(node) => {
                let mut out = vec![NODE_TYPE_HASH];
                out.extend_from_slice(&node.hash.to_be_bytes());
                Ok(out)
            }
        }
    }

    /// Decode a stored node
    pub fn decode(blob: &[u8]) -> ZkTrieResult<TreeNode> {
        Self::decode_with_preimage(blob).map(|(node, _)| node)
    }

    /// Decode a stored node and the key preimage a leaf may carry
    pub fn decode_with_preimage(blob: &[u8]) -> ZkTrieResult<(TreeNode, Option<Vec<u8>>)> {
        let (tag, body) = blob.split_first().ok_or(ZkTrieError::NodeBytesBadSize(0))?;
        match *tag {
            NODE_TYPE_PARENT => {
                if body.len() != 2 * HASH_BYTE_LEN {
                    return Err(ZkTrieError::NodeBytesBadSize(blob.len()));
                }
                let left = ZkHash::from_be_slice(&body[..HASH_BYTE_LEN]);
                let right = ZkHash::from_be_slice(&body[HASH_BYTE_LEN..]);
                Ok((
                    TreeNode::Parent(ParentNode::new(TreeNode::from_hash(left), TreeNode::from_hash(right))),
                    None,
                ))
            }
            NODE_TYPE_LEAF => {
                let (leaf, preimage) = LeafNode::decode(body)?;
                Ok((TreeNode::Leaf(leaf), preimage))
            }
            NODE_TYPE_EMPTY => Ok((TreeNode::Empty, None)),
            other => Err(ZkTrieError::InvalidNodeType(other)),
        }
    }

    /// Record the digest a decoded node was stored under
    pub(crate) fn with_hash(self, hash: ZkHash) -> TreeNode {
        match &self {
            TreeNode::Parent(node) => {
                let _ = node.hash.set(hash);
            }
            TreeNode::Leaf(node) => {
                let _ = node.hash.set(hash);
            }
            TreeNode::Empty | TreeNode::Hash(_) => {}
        }
        self
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeNode::Empty => write!(f, "Empty"),
            TreeNode::Parent(node) => f
                .debug_struct("Parent")
                .field("left", &node.left.cached_hash())
                .field("right", &node.right.cached_hash())
                .field("hash", &node.hash.get())
                .finish(),
            TreeNode::Leaf(node) => f
                .debug_struct("Leaf")
                .field("key", &node.key)
                .field("flags", &node.compressed_flags)
                .field("words", &node.value_preimage.len())
                .field("hash", &node.hash.get())
                .finish(),
            TreeNode::Hash(node) => write!(f, "Hash({})", node.hash),
        }
    }
}

impl ParentNode {
    /// Create a parent from its children
    pub fn new(left: NodeRef, right: NodeRef) -> Self {
        Self { left, right, hash: OnceCell::new() }
    }

    /// Create a parent placing `child` in direction `dir` and `sibling` on the other side
    pub fn with_child(dir: u8, child: NodeRef, sibling: NodeRef) -> Self {
        if dir == LEFT {
            Self::new(child, sibling)
        } else {
            Self::new(sibling, child)
        }
    }

    /// Child in direction `dir`
    pub fn child(&self, dir: u8) -> &NodeRef {
        if dir == LEFT {
            &self.left
        } else {
            &self.right
        }
    }

    /// Left child
    pub fn left(&self) -> &NodeRef {
        &self.left
    }

    /// Right child
    pub fn right(&self) -> &NodeRef {
        &self.right
    }

    /// Cached digest
    pub fn hash(&self) -> Option<ZkHash> {
        self.hash.get().copied()
    }

    /// Replace a child. The cached digest survives only when a placeholder
    /// is swapped for the node it stands for.
    pub fn set_child(&mut self, dir: u8, child: NodeRef) {
        let slot = if dir == LEFT { &mut self.left } else { &mut self.right };
        let same_digest = match (&**slot, child.cached_hash()) {
            (TreeNode::Hash(old), Some(new)) => old.hash == new,
            _ => false,
        };
        *slot = child;
        if !same_digest {
            self.hash = OnceCell::new();
        }
    }
}

impl LeafNode {
    /// Create a leaf for `key` holding `value`
    pub fn new(key: ZkHash, value: &[u8]) -> ZkTrieResult<Self> {
        let (flags, words) = marshal_bytes(value)?;
        Self::from_words(key, flags, words)
    }

    /// Create a leaf from already marshalled words. The word count is
    /// encoded in one byte.
    pub fn from_words(key: ZkHash, compressed_flags: u32, value_preimage: Vec<Byte32>) -> ZkTrieResult<Self> {
        if value_preimage.len() > MAX_VALUE_WORDS {
            return Err(ZkTrieError::TooManyValueWords(value_preimage.len()));
        }
        Ok(Self {
            key,
            value_preimage,
            compressed_flags,
            value_hash: OnceCell::new(),
            hash: OnceCell::new(),
        })
    }

    /// Tree key
    pub fn key(&self) -> &ZkHash {
        &self.key
    }

    /// Value words
    pub fn value_preimage(&self) -> &[Byte32] {
        &self.value_preimage
    }

    /// Compression flags of the value words
    pub fn compressed_flags(&self) -> u32 {
        self.compressed_flags
    }

    /// Cached digest
    pub fn hash(&self) -> Option<ZkHash> {
        self.hash.get().copied()
    }

    /// Value bytes, the concatenation of all words
    pub fn data(&self) -> Vec<u8> {
        self.value_preimage.iter().flat_map(|w| w.iter().copied()).collect()
    }

    /// Whether both leaves store the same value
    pub fn same_value(&self, other: &LeafNode) -> bool {
        self.compressed_flags == other.compressed_flags && self.value_preimage == other.value_preimage
    }

    /// Hash of the value words, memoized
    pub fn value_hash(&self, hasher: &dyn Hasher) -> ZkTrieResult<ZkHash> {
        if let Some(hash) = self.value_hash.get() {
            return Ok(*hash);
        }
        let hash = hasher.pre_handle(self.compressed_flags, &self.value_preimage)?;
        let _ = self.value_hash.set(hash);
        Ok(hash)
    }

    fn compute_leaf_hash(&self, hasher: &dyn Hasher) -> ZkTrieResult<ZkHash> {
        let value_hash = self.value_hash(hasher)?;
        Ok(leaf_hash(hasher, &self.key, &value_hash)?)
    }

    /// Canonical encoding, optionally carrying the natural key
    pub fn encode_with_preimage(&self, preimage: Option<&[u8]>) -> Vec<u8> {
        let words = self.value_preimage.len();
        let mut out = Vec::with_capacity(1 + HASH_BYTE_LEN + 4 + words * HASH_BYTE_LEN + 1 + HASH_BYTE_LEN);
        out.push(NODE_TYPE_LEAF);
        out.extend_from_slice(&self.key.to_be_bytes());
        let mut mark = [0u8; 4];
        LittleEndian::write_u32(&mut mark, (self.compressed_flags << 8) | (words as u32 & 0xff));
        out.extend_from_slice(&mark);
        for word in &self.value_preimage {
            out.extend_from_slice(word);
        }
        match preimage {
            Some(p) if !p.is_empty() => {
                let len = p.len().min(HASH_BYTE_LEN);
                out.push(len as u8);
                out.extend_from_slice(&p[..len]);
            }
            _ => out.push(0),
        }
        out
    }

    fn decode(body: &[u8]) -> ZkTrieResult<(Self, Option<Vec<u8>>)> {
        let header = HASH_BYTE_LEN + 4;
        if body.len() < header {
            return Err(ZkTrieError::NodeBytesBadSize(body.len() + 1));
        }
        let key = ZkHash::from_be_slice(&body[..HASH_BYTE_LEN]);
        let mark = LittleEndian::read_u32(&body[HASH_BYTE_LEN..header]);
        let words = (mark & 0xff) as usize;
        let rest = &body[header..];
        if rest.len() < words * HASH_BYTE_LEN + 1 {
            return Err(ZkTrieError::NodeBytesBadSize(body.len() + 1));
        }
        let value_preimage = rest[..words * HASH_BYTE_LEN]
            .chunks(HASH_BYTE_LEN)
            .map(byte32_from_bytes)
            .collect();
        let rest = &rest[words * HASH_BYTE_LEN..];
        let preimage_len = rest[0] as usize;
        let preimage = if preimage_len == 0 {
            None
        } else {
            if rest.len() < 1 + preimage_len {
                return Err(ZkTrieError::NodeBytesBadSize(body.len() + 1));
            }
            Some(rest[1..1 + preimage_len].to_vec())
        };
        Ok((Self::from_words(key, mark >> 8, value_preimage)?, preimage))
    }
}

impl HashNode {
    /// The digest this placeholder stands for
    pub fn hash(&self) -> ZkHash {
        self.hash
    }

    /// The resolved node, loading it with `load` on first use
    pub fn resolve<F>(&self, load: F) -> ZkTrieResult<NodeRef>
    where
        F: FnOnce(&ZkHash) -> ZkTrieResult<NodeRef>,
    {
        self.resolved.get_or_try_init(|| load(&self.hash)).map(Arc::clone)
    }
}

/// Digest of a leaf with `key` and `value_hash`
pub fn leaf_hash(hasher: &dyn Hasher, key: &ZkHash, value_hash: &ZkHash) -> ZkTrieResult<ZkHash> {
    Ok(hasher.hash_elems(&byte32_from_u64(1), &key.to_be_bytes(), &[value_hash.to_be_bytes()])?)
}

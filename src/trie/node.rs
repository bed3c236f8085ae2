use array_init::array_init;

use alloy_rlp::EMPTY_STRING_CODE;

use super::encode::{compact_decode, compact_encode, Nibble};
use super::rlp::{self, RlpItem};
use super::{keccak256, TrieError, TrieResult};
use crate::storage::block_store::Hash;

/// Cache state of a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Digest of the node when known
    pub hash: Option<Hash>,
    /// Whether the node still has to be written
    pub dirty: bool,
}

impl NodeFlags {
    /// Flags of a freshly built node
    pub fn dirty() -> Self {
        Self { hash: None, dirty: true }
    }

    /// Flags of a node loaded from the database under `hash`
    pub fn stored(hash: Option<Hash>) -> Self {
        Self { hash, dirty: false }
    }
}

/// Node types in the Merkle Patricia Trie
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Empty node (null)
    Empty,

    /// Leaf node with the remaining key nibbles
    Leaf {
        path: Vec<Nibble>,
        value: Vec<u8>,
        flags: NodeFlags,
    },

    /// Extension node with a shared prefix
    Extension {
        path: Vec<Nibble>,
        child: Box<Node>,
        flags: NodeFlags,
    },

    /// Branch node with up to 16 children
    Branch {
        children: Box<[Node; 16]>,
        value: Option<Vec<u8>>,
        flags: NodeFlags,
    },

    /// Reference to a node that has not been loaded
    Hash(Hash),
}

/// How a parent refers to a child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    /// keccak256 of an encoding of at least 32 bytes
    Hash(Hash),
    /// Encodings shorter than 32 bytes are embedded in the parent
    Inline(Vec<u8>),
}

impl Node {
    pub fn leaf(path: Vec<Nibble>, value: Vec<u8>) -> Self {
        Node::Leaf { path, value, flags: NodeFlags::dirty() }
    }

    pub fn extension(path: Vec<Nibble>, child: Node) -> Self {
        Node::Extension { path, child: Box::new(child), flags: NodeFlags::dirty() }
    }

    pub fn branch(children: Box<[Node; 16]>, value: Option<Vec<u8>>) -> Self {
        Node::Branch { children, value, flags: NodeFlags::dirty() }
    }

    /// A branch with no children and no value
    pub fn empty_branch() -> Self {
        Self::branch(Box::new(array_init(|_| Node::Empty)), None)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Cache flags of a full node
    pub fn flags(&self) -> Option<&NodeFlags> {
        match self {
            Node::Leaf { flags, .. } | Node::Extension { flags, .. } | Node::Branch { flags, .. } => Some(flags),
            Node::Empty | Node::Hash(_) => None,
        }
    }

    pub(crate) fn flags_mut(&mut self) -> Option<&mut NodeFlags> {
        match self {
            Node::Leaf { flags, .. } | Node::Extension { flags, .. } | Node::Branch { flags, .. } => Some(flags),
            Node::Empty | Node::Hash(_) => None,
        }
    }

    /// Get the node type as a string
    pub fn node_type(&self) -> &'static str {
        match self {
            Node::Empty => "empty",
            Node::Leaf { .. } => "leaf",
            Node::Extension { .. } => "extension",
            Node::Branch { .. } => "branch",
            Node::Hash(_) => "hash",
        }
    }

    /// RLP encoding with the given child references
    pub(crate) fn encode_with<F>(&self, mut child_ref: F) -> TrieResult<Vec<u8>>
    where
        F: FnMut(&Node) -> TrieResult<ChildRef>,
    {
        let mut payload = Vec::new();
        match self {
            Node::Empty => return Ok(vec![EMPTY_STRING_CODE]),
            Node::Hash(hash) => return Ok(rlp::encode_bytes(hash)),
            Node::Leaf { path, value, .. } => {
                rlp::append_bytes(&mut payload, &compact_encode(path, true));
                rlp::append_bytes(&mut payload, value);
            }
            Node::Extension { path, child, .. } => {
                rlp::append_bytes(&mut payload, &compact_encode(path, false));
                append_ref(&mut payload, &child_ref(child)?);
            }
            Node::Branch { children, value, .. } => {
                for child in children.iter() {
                    append_ref(&mut payload, &child_ref(child)?);
                }
                match value {
                    Some(v) => rlp::append_bytes(&mut payload, v),
                    None => rlp::append_empty(&mut payload),
                }
            }
        }
        Ok(rlp::encode_list(&payload))
    }

    /// RLP encoding, computing child references recursively
    pub fn encode(&self) -> TrieResult<Vec<u8>> {
        self.encode_with(|child| child.reference())
    }

    /// Reference a parent would use for this node
    pub fn reference(&self) -> TrieResult<ChildRef> {
        match self {
            Node::Empty => Ok(ChildRef::Inline(vec![EMPTY_STRING_CODE])),
            Node::Hash(hash) => Ok(ChildRef::Hash(*hash)),
            _ => {
                if let Some(hash) = self.flags().and_then(|f| f.hash) {
                    return Ok(ChildRef::Hash(hash));
                }
                Ok(ChildRef::from_encoding(self.encode()?))
            }
        }
    }

    /// Decode a stored node, recording the digest it was stored under
    pub fn decode(blob: &[u8], hash: Option<Hash>) -> TrieResult<Node> {
        let items = rlp::decode_list(blob)?;
        match items.len() {
            2 => {
                let (path, is_leaf) = compact_decode(items[0].as_bytes()?);
                if is_leaf {
                    Ok(Node::Leaf {
                        path,
                        value: items[1].as_bytes()?.to_vec(),
                        flags: NodeFlags::stored(hash),
                    })
                } else {
                    Ok(Node::Extension {
                        path,
                        child: Box::new(Self::decode_ref(&items[1])?),
                        flags: NodeFlags::stored(hash),
                    })
                }
            }
            17 => {
                let mut children: Box<[Node; 16]> = Box::new(array_init(|_| Node::Empty));
                for (slot, item) in children.iter_mut().zip(items.iter()) {
                    *slot = Self::decode_ref(item)?;
                }
                let value = match items[16].as_bytes()? {
                    [] => None,
                    v => Some(v.to_vec()),
                };
                Ok(Node::Branch { children, value, flags: NodeFlags::stored(hash) })
            }
            n => Err(TrieError::InvalidNode(format!("list of {} items", n))),
        }
    }

    fn decode_ref(item: &RlpItem<'_>) -> TrieResult<Node> {
        match item {
            RlpItem::Bytes([]) => Ok(Node::Empty),
            RlpItem::Bytes(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(bytes);
                Ok(Node::Hash(hash))
            }
            RlpItem::Raw(raw) => Self::decode(raw, None),
            RlpItem::Bytes(bytes) => Err(TrieError::InvalidNode(format!("child reference of {} bytes", bytes.len()))),
        }
    }
}

impl ChildRef {
    /// Reference for an encoded node
    pub fn from_encoding(encoded: Vec<u8>) -> Self {
        if encoded.len() < 32 {
            ChildRef::Inline(encoded)
        } else {
            ChildRef::Hash(keccak256(&encoded))
        }
    }
}

fn append_ref(payload: &mut Vec<u8>, child: &ChildRef) {
    match child {
        ChildRef::Hash(hash) => rlp::append_bytes(payload, hash),
        ChildRef::Inline(raw) => payload.extend_from_slice(raw),
    }
}

use super::hash::{test_bit, ZkHash, HASH_BYTE_LEN};

/// Path direction towards the left child
pub const LEFT: u8 = 0;
/// Path direction towards the right child
pub const RIGHT: u8 = 1;

/// Binary path of a key through the tree, one direction per level.
///
/// Level `n` follows bit `n` of the little-endian key, so the first level
/// uses the least significant bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePath(Vec<u8>);

impl TreePath {
    /// Path of the first `max_levels` bits of a little-endian key
    pub fn from_bytes(key: &[u8], max_levels: usize) -> Self {
        TreePath((0..max_levels).map(|n| if test_bit(key, n) { RIGHT } else { LEFT }).collect())
    }

    /// Full-width path of a digest
    pub fn from_hash(hash: &ZkHash) -> Self {
        Self::from_bytes(hash.as_le_bytes(), HASH_BYTE_LEN * 8)
    }

    /// Number of levels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no levels
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Direction at `level`
    pub fn get(&self, level: usize) -> u8 {
        self.0[level]
    }

    /// Sibling direction at `level`
    pub fn other(&self, level: usize) -> u8 {
        self.0[level] ^ RIGHT
    }
}

/// Iterator key of a tree key: its path as a big-endian integer.
///
/// Leaves come out of an in-order walk in ascending iterator-key order.
pub fn hash_to_iterator_key(hash: &ZkHash) -> [u8; HASH_BYTE_LEN] {
    let mut key = *hash.as_le_bytes();
    for byte in key.iter_mut() {
        *byte = byte.reverse_bits();
    }
    key
}

/// Inverse of [`hash_to_iterator_key`]
pub fn iterator_key_to_hash(key: &[u8; HASH_BYTE_LEN]) -> ZkHash {
    let mut bytes = *key;
    for byte in bytes.iter_mut() {
        *byte = byte.reverse_bits();
    }
    ZkHash::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    /// The path read as a big-endian integer, level 0 being the top bit
    fn path_integer(path: &TreePath) -> BigUint {
        (0..path.len()).fold(BigUint::default(), |acc, level| (acc << 1u32) + BigUint::from(path.get(level)))
    }

    #[test]
    fn test_path_follows_low_bits_first() {
        let mut key = [0u8; 32];
        key[0] = 0b0000_0101;
        let path = TreePath::from_bytes(&key, 4);
        let directions: Vec<u8> = (0..path.len()).map(|level| path.get(level)).collect();
        assert_eq!(directions, vec![RIGHT, LEFT, RIGHT, LEFT]);
        assert_eq!(path.other(1), RIGHT);
        assert_eq!(path_integer(&path), BigUint::from(0b1010u8));
    }

    #[test]
    fn test_hash_round_trip() {
        let mut key = [0u8; 32];
        key[3] = 0x5a;
        key[31] = 0x81;
        let hash = ZkHash::from_le_bytes(key);
        assert_eq!(TreePath::from_hash(&hash).len(), 256);
        assert_eq!(iterator_key_to_hash(&hash_to_iterator_key(&hash)), hash);
    }

    #[test]
    fn test_iterator_key_matches_path_integer() {
        let mut key = [0u8; 32];
        key[0] = 0x01;
        key[1] = 0x80;
        let hash = ZkHash::from_le_bytes(key);
        let iter_key = hash_to_iterator_key(&hash);
        let from_path = path_integer(&TreePath::from_hash(&hash));
        assert_eq!(BigUint::from_bytes_be(&iter_key), from_path);
    }
}

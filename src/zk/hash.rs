//! Digest and field-element word types used by the ZK trie.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length in bytes of a digest or word
pub const HASH_BYTE_LEN: usize = 32;

/// A 32-byte word holding a big-endian field element
pub type Byte32 = [u8; HASH_BYTE_LEN];

/// A ZK trie digest.
///
/// The bytes are kept in little-endian order so bit `n` of the key is
/// `bytes[n / 8] >> (n % 8) & 1`. Node-store keys use this order; the node
/// encoding and all hex output use the big-endian form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ZkHash([u8; HASH_BYTE_LEN]);

impl ZkHash {
    /// The all-zero digest of the empty node
    pub const ZERO: ZkHash = ZkHash([0u8; HASH_BYTE_LEN]);

    /// Wrap little-endian bytes
    pub fn from_le_bytes(bytes: [u8; HASH_BYTE_LEN]) -> Self {
        ZkHash(bytes)
    }

    /// Build from a big-endian integer encoding
    pub fn from_be_bytes(bytes: &Byte32) -> Self {
        let mut le = *bytes;
        le.reverse();
        ZkHash(le)
    }

    /// Build from a big-endian slice. Shorter input is left padded, longer
    /// input keeps its last 32 bytes.
    pub fn from_be_slice(bytes: &[u8]) -> Self {
        ZkHash::from_be_bytes(&byte32_from_bytes(bytes))
    }

    /// Little-endian bytes, used as the tree key and node-store key
    pub fn as_le_bytes(&self) -> &[u8; HASH_BYTE_LEN] {
        &self.0
    }

    /// Big-endian bytes
    pub fn to_be_bytes(&self) -> Byte32 {
        let mut be = self.0;
        be.reverse();
        be
    }

    /// Whether this is the empty digest
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_BYTE_LEN]
    }

    /// Test bit `n` counted from the least significant bit
    pub fn test_bit(&self, n: usize) -> bool {
        test_bit(&self.0, n)
    }

    /// Big-endian hex string with `0x` prefix
    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Debug for ZkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZkHash({})", self.hex())
    }
}

impl fmt::Display for ZkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

/// Test bit `n` of a little-endian bit string
pub fn test_bit(bitmap: &[u8], n: usize) -> bool {
    bitmap[n / 8] & (1 << (n % 8)) != 0
}

/// Test bit `n` of a bitmap whose bit 0 is the last bit of the last byte
pub fn test_bit_big_endian(bitmap: &[u8], n: usize) -> bool {
    bitmap[bitmap.len() - n / 8 - 1] & (1 << (n % 8)) != 0
}

/// Set bit `n` of a bitmap whose bit 0 is the last bit of the last byte
pub fn set_bit_big_endian(bitmap: &mut [u8], n: usize) {
    let idx = bitmap.len() - n / 8 - 1;
    bitmap[idx] |= 1 << (n % 8);
}

/// Right-align `data` in a word, keeping the last 32 bytes of longer input
pub fn byte32_from_bytes(data: &[u8]) -> Byte32 {
    let mut word = [0u8; HASH_BYTE_LEN];
    if data.len() >= HASH_BYTE_LEN {
        word.copy_from_slice(&data[data.len() - HASH_BYTE_LEN..]);
    } else {
        word[HASH_BYTE_LEN - data.len()..].copy_from_slice(data);
    }
    word
}

/// Left-align `data` in a word, zero padding on the right
pub fn byte32_padding_zero(data: &[u8]) -> Byte32 {
    let mut word = [0u8; HASH_BYTE_LEN];
    let len = data.len().min(HASH_BYTE_LEN);
    word[..len].copy_from_slice(&data[..len]);
    word
}

/// Encode a small integer as a word
pub fn byte32_from_u64(value: u64) -> Byte32 {
    let mut word = [0u8; HASH_BYTE_LEN];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Strip leading zero bytes
pub fn trim_left_zeroes(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| *b != 0).unwrap_or(data.len());
    &data[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_orders() {
        let mut be = [0u8; 32];
        be[31] = 0x01;
        be[0] = 0x80;
        let hash = ZkHash::from_be_bytes(&be);
        assert_eq!(hash.as_le_bytes()[0], 0x01);
        assert_eq!(hash.as_le_bytes()[31], 0x80);
        assert_eq!(hash.to_be_bytes(), be);
        assert!(hash.test_bit(0));
        assert!(hash.test_bit(255));
        assert!(!hash.test_bit(1));
        assert_eq!(ZkHash::from_be_slice(&[0x80, 0, 1]).to_be_bytes()[29..], [0x80, 0, 1]);
    }

    #[test]
    fn test_word_padding() {
        assert_eq!(byte32_from_bytes(&[1, 2])[30..], [1, 2]);
        assert_eq!(byte32_padding_zero(&[1, 2])[..2], [1, 2]);
        assert_eq!(byte32_from_u64(0x0102)[30..], [1, 2]);
        assert_eq!(trim_left_zeroes(&[0, 0, 5, 0]), &[5, 0]);
        assert!(trim_left_zeroes(&[0, 0]).is_empty());
    }

    #[test]
    fn test_big_endian_bitmap() {
        let mut bitmap = [0u8; 32];
        set_bit_big_endian(&mut bitmap, 0);
        set_bit_big_endian(&mut bitmap, 9);
        assert_eq!(bitmap[31], 0x01);
        assert_eq!(bitmap[30], 0x02);
        assert!(test_bit_big_endian(&bitmap, 9));
        assert!(!test_bit_big_endian(&bitmap, 8));
    }
}

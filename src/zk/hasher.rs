//! Pluggable node hash functions.
//!
//! Every node hash is built from a 2-to-1 compression of field elements.
//! Production trees use [`PoseidonHasher`]; [`KeccakHasher`] is much faster
//! and accepts any 256-bit input, which makes it the hasher of choice for
//! tests with thousands of keys.

use sha3::{Digest, Keccak256};
use std::fmt;
use std::sync::Arc;

use super::hash::{byte32_from_bytes, byte32_from_u64, byte32_padding_zero, trim_left_zeroes, Byte32, ZkHash};
use super::poseidon;
use crate::config::HasherKind;

/// Number of leading value words that may be hash-compressed
pub const MAX_COMPRESSED_WORDS: usize = 24;

/// Error type for hash computations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Input word is not a canonical field element
    #[error("Element {0} is not in the scalar field")]
    NotInField(String),

    /// No value words to hash
    #[error("No elements to hash")]
    NoElements,

    /// Natural key longer than a word
    #[error("Key of {0} bytes does not fit in a word")]
    KeyTooLong(usize),
}

/// Node hash function
pub trait Hasher: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Compress two field elements into one
    fn hash_pair(&self, fst: &Byte32, snd: &Byte32) -> Result<Byte32, HashError>;

    /// Hash two or more elements. Extra elements are folded pairwise before
    /// being combined with the hash of the first two.
    fn hash_elems(&self, fst: &Byte32, snd: &Byte32, rest: &[Byte32]) -> Result<ZkHash, HashError> {
        let base = self.hash_pair(fst, snd)?;
        match rest.len() {
            0 => Ok(ZkHash::from_be_bytes(&base)),
            1 => self.hash_elems(&base, &rest[0], &[]),
            len => {
                let mut folded = Vec::with_capacity((len + 1) / 2);
                for pair in rest.chunks(2) {
                    if pair.len() == 2 {
                        folded.push(self.hash_pair(&pair[0], &pair[1])?);
                    } else {
                        folded.push(pair[0]);
                    }
                }
                self.hash_elems(&base, &folded[0], &folded[1..])
            }
        }
    }

    /// Hash the value words of a leaf. A word whose bit is set in `flags` is
    /// first replaced by the hash of its two 16-byte halves.
    fn pre_handle(&self, flags: u32, elems: &[Byte32]) -> Result<ZkHash, HashError> {
        if elems.is_empty() {
            return Err(HashError::NoElements);
        }
        let mut words = Vec::with_capacity(elems.len());
        for (i, elem) in elems.iter().enumerate() {
            if i < MAX_COMPRESSED_WORDS && flags & (1 << i) != 0 {
                words.push(self.hash_word(elem)?);
            } else {
                words.push(*elem);
            }
        }
        if words.len() < 2 {
            return Ok(ZkHash::from_be_bytes(&words[0]));
        }
        self.hash_elems(&words[0], &words[1], &words[2..])
    }

    /// Hash a full word as its two 16-byte halves
    fn hash_word(&self, word: &Byte32) -> Result<Byte32, HashError> {
        let hi = byte32_from_bytes(&word[..16]);
        let lo = byte32_from_bytes(&word[16..]);
        self.hash_pair(&hi, &lo)
    }

    /// Hash a natural key (address or slot) into the tree key
    fn secure_key(&self, key: &[u8]) -> Result<ZkHash, HashError> {
        if key.len() > 32 {
            return Err(HashError::KeyTooLong(key.len()));
        }
        let word = byte32_padding_zero(key);
        Ok(ZkHash::from_be_bytes(&self.hash_word(&word)?))
    }
}

/// Shared hasher handle
pub type SharedHasher = Arc<dyn Hasher>;

/// Build the hasher selected in configuration
pub fn new_hasher(kind: HasherKind) -> SharedHasher {
    match kind {
        HasherKind::Poseidon => Arc::new(PoseidonHasher),
        HasherKind::Keccak => Arc::new(KeccakHasher),
    }
}

/// Poseidon over the BN254 scalar field
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseidonHasher;

impl Hasher for PoseidonHasher {
    fn name(&self) -> &'static str {
        "poseidon"
    }

    fn hash_pair(&self, fst: &Byte32, snd: &Byte32) -> Result<Byte32, HashError> {
        poseidon::hash_pair(fst, snd)
    }
}

/// Keccak256 substitute hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct KeccakHasher;

impl KeccakHasher {
    fn digest(parts: &[&Byte32]) -> Byte32 {
        let mut hasher = Keccak256::new();
        for part in parts {
            hasher.update(trim_left_zeroes(&part[..]));
        }
        hasher.finalize().into()
    }
}

impl Hasher for KeccakHasher {
    fn name(&self) -> &'static str {
        "keccak"
    }

    fn hash_pair(&self, fst: &Byte32, snd: &Byte32) -> Result<Byte32, HashError> {
        Ok(Self::digest(&[fst, snd]))
    }

    fn hash_elems(&self, fst: &Byte32, snd: &Byte32, rest: &[Byte32]) -> Result<ZkHash, HashError> {
        let mut parts = vec![fst, snd];
        parts.extend(rest.iter());
        Ok(ZkHash::from_be_bytes(&Self::digest(&parts)))
    }

    fn pre_handle(&self, flags: u32, elems: &[Byte32]) -> Result<ZkHash, HashError> {
        let (first, rest) = elems.split_first().ok_or(HashError::NoElements)?;
        self.hash_elems(&byte32_from_u64(flags as u64), first, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_hash_elems_ignores_leading_zeroes() {
        let hasher = KeccakHasher;
        let a = byte32_from_u64(1);
        let b = byte32_from_u64(2);
        let expected: Byte32 = Keccak256::digest([1u8, 2u8]).into();
        assert_eq!(hasher.hash_elems(&a, &b, &[]).unwrap(), ZkHash::from_be_bytes(&expected));
    }

    #[test]
    fn test_pre_handle_single_word_is_identity() {
        let hasher = KeccakHasher;
        let word = byte32_from_u64(42);
        // The keccak substitute always mixes in the flags
        assert_ne!(hasher.pre_handle(0, &[word]).unwrap(), ZkHash::from_be_bytes(&word));

        let poseidon = PoseidonHasher;
        assert_eq!(poseidon.pre_handle(0, &[word]).unwrap(), ZkHash::from_be_bytes(&word));
    }

    #[test]
    fn test_pre_handle_compresses_flagged_words() {
        let hasher = PoseidonHasher;
        let mut big = [0xffu8; 32];
        big[0] = 0xff;
        // Not a field element on its own
        assert!(hasher.pre_handle(0, &[big, big]).is_err());
        // Flagged words are split into halves first
        assert!(hasher.pre_handle(0b11, &[big, big]).is_ok());
    }

    #[test]
    fn test_default_hash_elems_folds_pairs() {
        let hasher = PoseidonHasher;
        let e: Vec<Byte32> = (1..=5).map(byte32_from_u64).collect();
        let base = hasher.hash_pair(&e[0], &e[1]).unwrap();
        let h23 = hasher.hash_pair(&e[2], &e[3]).unwrap();
        let inner = hasher.hash_pair(&base, &h23).unwrap();
        let expected = hasher.hash_pair(&inner, &e[4]).unwrap();
        assert_eq!(
            hasher.hash_elems(&e[0], &e[1], &e[2..]).unwrap(),
            ZkHash::from_be_bytes(&expected)
        );
    }

    fn expected(hex_str: &str) -> ZkHash {
        ZkHash::from_be_bytes(&byte32_from_bytes(&hex::decode(hex_str).unwrap()))
    }

    #[test]
    fn test_poseidon_known_answers() {
        let hasher = PoseidonHasher;
        let e: Vec<Byte32> = (1..=5).map(byte32_from_u64).collect();
        assert_eq!(
            hasher.hash_elems(&e[0], &e[1], &e[2..]).unwrap(),
            expected("1973be9a0ac928df30c68c1698876c310c8246a3f215d33764045ec9da859b08")
        );

        // second word flagged for compression
        let words = [byte32_from_u64(7), [0xffu8; 32], byte32_from_u64(9)];
        assert_eq!(
            hasher.pre_handle(0b10, &words).unwrap(),
            expected("262fad90f658261cb6f52f7b997f8c3de922b3e7688dc10008d5af52b5d68d5d")
        );

        let address: Vec<u8> = (1..=20).collect();
        assert_eq!(
            hasher.secure_key(&address).unwrap(),
            expected("2e0e0e65b16a89a51ae9c90befb8b20d485c28e0d2d96e583eaca193a7122887")
        );
    }

    #[test]
    fn test_secure_key_rejects_long_keys() {
        assert_eq!(KeccakHasher.secure_key(&[0u8; 33]), Err(HashError::KeyTooLong(33)));
        let a = KeccakHasher.secure_key(&[1u8; 20]).unwrap();
        let b = KeccakHasher.secure_key(&[2u8; 20]).unwrap();
        assert_ne!(a, b);
    }
}

//! Nibble paths and hex-prefix compaction.
//!
//! Paths are kept as plain nibble vectors inside nodes; packing and the
//! hex-prefix layout go through [`alloy_trie::Nibbles`].

use alloy_trie::Nibbles;

/// Nibble is a 4-bit value (0-15)
pub type Nibble = u8;

/// Split each byte into its high and low nibble
pub fn bytes_to_nibbles(bytes: &[u8]) -> Vec<Nibble> {
    Nibbles::unpack(bytes).to_vec()
}

/// Join pairs of nibbles back into bytes. An odd trailing nibble fills the
/// high half of the last byte.
pub fn nibbles_to_bytes(nibbles: &[Nibble]) -> Vec<u8> {
    Nibbles::from_nibbles(nibbles).pack().to_vec()
}

/// Hex-prefix encoding of a leaf (`is_leaf`) or extension path
pub fn compact_encode(nibbles: &[Nibble], is_leaf: bool) -> Vec<u8> {
    alloy_trie::nodes::encode_path_leaf(&Nibbles::from_nibbles(nibbles), is_leaf).to_vec()
}

/// Decode a hex-prefix path, returning the nibbles and the leaf flag
pub fn compact_decode(compact: &[u8]) -> (Vec<Nibble>, bool) {
    let flags = match compact.first() {
        Some(first) => first >> 4,
        None => return (Vec::new(), false),
    };
    // odd paths keep their first nibble in the flag byte
    let skip = if flags & 0x1 != 0 { 1 } else { 2 };
    let unpacked = Nibbles::unpack(compact);
    (unpacked[skip..].to_vec(), flags & 0x2 != 0)
}

/// Length of the common prefix of two paths
pub fn prefix_len(a: &[Nibble], b: &[Nibble]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Format a path for logs
pub fn format_nibbles(nibbles: &[Nibble]) -> String {
    nibbles.iter().map(|n| format!("{:x}", n)).collect()
}

//! RLP helpers for trie nodes on top of `alloy_rlp`.
//!
//! Node decoding needs the raw bytes of nested lists so that embedded
//! children can be decoded as nodes of their own; [`RlpItem`] keeps them.

use alloy_rlp::{BufMut, Encodable, Header, EMPTY_STRING_CODE};

use super::{TrieError, TrieResult};

/// RLP encoding of a byte string
pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    alloy_rlp::encode(bytes)
}

/// Append the RLP encoding of a byte string to `out`
pub fn append_bytes(out: &mut dyn BufMut, bytes: &[u8]) {
    bytes.encode(out)
}

/// Append the empty string to `out`
pub fn append_empty(out: &mut dyn BufMut) {
    out.put_u8(EMPTY_STRING_CODE)
}

/// Wrap already encoded items in a list header
pub fn encode_list(payload: &[u8]) -> Vec<u8> {
    let header = Header { list: true, payload_length: payload.len() };
    let mut out = Vec::with_capacity(payload.len() + 9);
    header.encode(&mut out);
    out.extend_from_slice(payload);
    out
}

/// The payload of a byte string spanning all of `data`
pub fn decode_bytes(data: &[u8]) -> TrieResult<&[u8]> {
    let mut buf = data;
    let payload = Header::decode_bytes(&mut buf, false)?;
    if !buf.is_empty() {
        return Err(TrieError::InvalidNode(format!("{} trailing bytes", buf.len())));
    }
    Ok(payload)
}

/// One item of a decoded list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem<'a> {
    /// String payload
    Bytes(&'a [u8]),
    /// Full encoding of a nested list
    Raw(&'a [u8]),
}

impl<'a> RlpItem<'a> {
    /// The byte string payload
    pub fn as_bytes(&self) -> TrieResult<&'a [u8]> {
        match self {
            RlpItem::Bytes(bytes) => Ok(bytes),
            RlpItem::Raw(_) => Err(TrieError::InvalidNode("expected a string, found a list".to_string())),
        }
    }
}

/// Split a list spanning all of `data` into its items
pub fn decode_list(data: &[u8]) -> TrieResult<Vec<RlpItem<'_>>> {
    let mut buf = data;
    let mut payload = Header::decode_bytes(&mut buf, true)?;
    if !buf.is_empty() {
        return Err(TrieError::InvalidNode(format!("{} trailing bytes", buf.len())));
    }

    let mut items = Vec::new();
    while !payload.is_empty() {
        let start = payload;
        let header = Header::decode(&mut payload)?;
        if payload.len() < header.payload_length {
            return Err(TrieError::Rlp(alloy_rlp::Error::InputTooShort));
        }
        let consumed = start.len() - payload.len() + header.payload_length;
        items.push(if header.list {
            RlpItem::Raw(&start[..consumed])
        } else {
            RlpItem::Bytes(&payload[..header.payload_length])
        });
        payload = &start[consumed..];
    }
    Ok(items)
}

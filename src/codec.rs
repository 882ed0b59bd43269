//! Pure, stateless record encode/decode for the L2 on-disk format.
//!
//! Record layout: `| keyLen:u32 BE | valueLen:u32 BE | keyBytes | valueBytes |`.
//! A zero-length value denotes a tombstone.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const HEADER_LEN: usize = 8;
const KEY_LEN_RANGE: std::ops::RangeInclusive<u32> = 1..=1_000_000;
const VALUE_LEN_RANGE: std::ops::RangeInclusive<u32> = 0..=10_000_000;

/// A decoded record header: the lengths of the key and value that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key_len: u32,
    pub value_len: u32,
}

impl RecordHeader {
    pub fn is_tombstone(&self) -> bool {
        self.value_len == 0
    }

    /// Total on-disk size of the record this header describes.
    pub fn record_len(&self) -> usize {
        HEADER_LEN + self.key_len as usize + self.value_len as usize
    }
}

/// Encode `key` plus an optional `value` (`None` = tombstone) into a single
/// framed record. Rejects records whose total size would be `>= limit`.
pub fn encode(key: &str, value: Option<&[u8]>, limit: usize) -> Result<Bytes> {
    let key_bytes = key.as_bytes();
    let value_len = value.map(|v| v.len()).unwrap_or(0);
    let total = HEADER_LEN + key_bytes.len() + value_len;
    if total >= limit {
        return Err(Error::TooBig {
            size: total,
            limit,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(key_bytes.len() as u32);
    buf.put_u32(value_len as u32);
    buf.put_slice(key_bytes);
    if let Some(v) = value {
        buf.put_slice(v);
    }
    Ok(buf.freeze())
}

/// Decode a record header from the first 8 bytes of `buf`, without
/// consuming the key/value payload.
pub fn decode_header(buf: &[u8]) -> Result<RecordHeader> {
    if buf.len() < HEADER_LEN {
        return Err(Error::Corrupt(format!(
            "header truncated: got {} bytes, need {HEADER_LEN}",
            buf.len()
        )));
    }
    let mut cursor = buf;
    let key_len = cursor.get_u32();
    let value_len = cursor.get_u32();

    if !KEY_LEN_RANGE.contains(&key_len) {
        return Err(Error::Corrupt(format!(
            "keyLen {key_len} out of range {KEY_LEN_RANGE:?}"
        )));
    }
    if !VALUE_LEN_RANGE.contains(&value_len) {
        return Err(Error::Corrupt(format!(
            "valueLen {value_len} out of range {VALUE_LEN_RANGE:?}"
        )));
    }

    Ok(RecordHeader { key_len, value_len })
}

/// Decode key bytes into a `String`. `Corrupt` if not valid UTF-8.
pub fn decode_key(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| Error::Corrupt(format!("key is not valid utf-8: {e}")))
}

/// Decode value bytes. The value is opaque to the codec; this simply
/// copies it into an owned `Bytes`.
pub fn decode_value(bytes: &[u8]) -> Bytes {
    Bytes::copy_from_slice(bytes)
}

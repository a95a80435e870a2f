//! MVCC value encoding.
//!
//! ```text
//! []                                   deletion tombstone
//! [checksum u32 BE][tag u8][payload]   live value
//! ```
//!
//! The checksum covers `key || tag || payload`. A stored checksum of zero
//! means the writer did not set one and verification skips it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::integrity::value_checksum;
use crate::mvcc_key::pretty_key;

pub const HEADER_SIZE: usize = 5;
const TAG_POS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("value for key {key} too short: {len} bytes")]
    TooShort { key: String, len: usize },

    #[error("invalid checksum for key {key}: expected {expected:#010x}, computed {computed:#010x}")]
    Checksum {
        key: String,
        expected: u32,
        computed: u32,
    },

    #[error("unknown value tag {tag} for key {key}")]
    UnknownTag { key: String, tag: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    Int = 1,
    Float = 2,
    Bytes = 3,
    Tuple = 4,
}

impl ValueTag {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Int),
            2 => Some(Self::Float),
            3 => Some(Self::Bytes),
            4 => Some(Self::Tuple),
            _ => None,
        }
    }
}

/// Encodes a checksummed live value for `key`.
pub fn encode(key: &[u8], tag: ValueTag, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32(0);
    buf.put_u8(tag as u8);
    buf.put_slice(payload);
    let checksum = value_checksum(key, &buf[TAG_POS..]);
    buf[0..4].copy_from_slice(&checksum.to_be_bytes());
    buf.freeze()
}

pub fn encode_bytes(key: &[u8], payload: &[u8]) -> Bytes {
    encode(key, ValueTag::Bytes, payload)
}

pub fn is_tombstone(raw: &[u8]) -> bool {
    raw.is_empty()
}

/// Payload of a live value, `None` for a tombstone or a short value.
pub fn payload(raw: &[u8]) -> Option<&[u8]> {
    raw.get(HEADER_SIZE..)
}

/// Checks that `raw` is a well-formed value for `key`.
pub fn verify(key: &[u8], raw: &[u8]) -> Result<(), ValueError> {
    if raw.is_empty() {
        return Ok(());
    }
    if raw.len() < HEADER_SIZE {
        return Err(ValueError::TooShort {
            key: pretty_key(key),
            len: raw.len(),
        });
    }

    let expected = u32::from_be_bytes(raw[0..4].try_into().unwrap());
    if expected != 0 {
        let computed = value_checksum(key, &raw[TAG_POS..]);
        if computed != expected {
            return Err(ValueError::Checksum {
                key: pretty_key(key),
                expected,
                computed,
            });
        }
    }

    let tag = raw[TAG_POS];
    if ValueTag::from_u8(tag).is_none() {
        return Err(ValueError::UnknownTag {
            key: pretty_key(key),
            tag,
        });
    }
    Ok(())
}

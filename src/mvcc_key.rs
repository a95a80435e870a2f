//! MVCC key format and ordering.
//!
//! Records are ordered by `(key ASC, timestamp DESC)` with one exception: the
//! zero timestamp marks an inline (unversioned) record and sorts before every
//! version of the same key. Seeking to `(key, ZERO)` therefore lands on the
//! first record stored for `key`.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Raw keys ordered before this prefix are range-local system keys.
pub const LOCAL_MAX: &[u8] = b"\x02";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated input")]
    Truncated,

    #[error("key length {0} exceeds input")]
    BadKeyLength(usize),
}

/// Hybrid logical timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub wall_time: i64,
    pub logical: i32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    pub fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    pub fn from_wall(wall_time: i64) -> Self {
        Self::new(wall_time, 0)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09},{}",
            self.wall_time / 1_000_000_000,
            self.wall_time % 1_000_000_000,
            self.logical
        )
    }
}

/// Versioned key `(key, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MvccKey {
    pub key: Bytes,
    pub timestamp: Timestamp,
}

impl MvccKey {
    pub fn new(key: impl Into<Bytes>, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            timestamp,
        }
    }

    /// Key positioned before every version of `key`.
    pub fn seek_key(key: impl Into<Bytes>) -> Self {
        Self::new(key, Timestamp::ZERO)
    }

    /// Smallest possible key.
    pub fn min() -> Self {
        Self::new(Bytes::new(), Timestamp::ZERO)
    }

    /// True for a versioned record, false for an inline one.
    pub fn is_value(&self) -> bool {
        !self.timestamp.is_zero()
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.key.len() + 8 + 4
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let key_len: u32 = self
            .key
            .len()
            .try_into()
            .expect("key too large to encode");
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(self.key.as_ref());
        buf.extend_from_slice(&self.timestamp.wall_time.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.logical.to_le_bytes());
    }

    /// Decodes a key from the front of `input`, returning it with the number
    /// of bytes consumed. Key bytes are sliced out of `input` without copying.
    pub fn decode(input: &Bytes) -> Result<(Self, usize), DecodeError> {
        if input.len() < 4 {
            return Err(DecodeError::Truncated);
        }
        let key_len = u32::from_le_bytes(input[0..4].try_into().unwrap()) as usize;
        let needed = 4usize
            .checked_add(key_len)
            .and_then(|n| n.checked_add(12))
            .ok_or(DecodeError::BadKeyLength(key_len))?;
        if input.len() < needed {
            return Err(DecodeError::BadKeyLength(key_len));
        }

        let key = input.slice(4..(4 + key_len));
        let ts_offset = 4 + key_len;
        let wall_time = i64::from_le_bytes(input[ts_offset..(ts_offset + 8)].try_into().unwrap());
        let logical =
            i32::from_le_bytes(input[(ts_offset + 8)..(ts_offset + 12)].try_into().unwrap());

        Ok((
            Self {
                key,
                timestamp: Timestamp { wall_time, logical },
            },
            needed,
        ))
    }

    pub fn as_key_ref(&self) -> MvccKeyRef<'_> {
        MvccKeyRef {
            key: self.key.as_ref(),
            timestamp: self.timestamp,
        }
    }
}

impl PartialOrd for MvccKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MvccKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_key_ref().cmp(&other.as_key_ref())
    }
}

/// Borrowed form of [`MvccKey`], valid only as long as the bytes it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MvccKeyRef<'a> {
    pub key: &'a [u8],
    pub timestamp: Timestamp,
}

impl MvccKeyRef<'_> {
    pub fn to_owned(&self) -> MvccKey {
        MvccKey::new(Bytes::copy_from_slice(self.key), self.timestamp)
    }

    pub fn is_value(&self) -> bool {
        !self.timestamp.is_zero()
    }
}

impl PartialOrd for MvccKeyRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MvccKeyRef<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(other.key) {
            Ordering::Equal => match (self.is_value(), other.is_value()) {
                (false, false) => Ordering::Equal,
                (false, true) => Ordering::Less,
                (true, false) => Ordering::Greater,
                (true, true) => other.timestamp.cmp(&self.timestamp),
            },
            other => other,
        }
    }
}

/// Escaped rendering of a raw key for error messages and logs.
pub fn pretty_key(key: &[u8]) -> String {
    format!("\"{}\"", key.escape_ascii())
}

pub fn is_system_key(key: &[u8]) -> bool {
    key < LOCAL_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &'static [u8], wall: i64) -> MvccKey {
        MvccKey::new(Bytes::from_static(k), Timestamp::from_wall(wall))
    }

    #[test]
    fn mvcc_key_ordering() {
        let k1 = key(b"a", 10);
        let k2 = key(b"a", 9);
        let k3 = key(b"b", 10);

        assert!(k1 < k2);
        assert!(k2 < k3);
    }

    #[test]
    fn inline_sorts_before_versions() {
        let inline = MvccKey::seek_key(Bytes::from_static(b"a"));
        assert!(inline < key(b"a", i64::MAX));
        assert!(key(b"", 1) > MvccKey::min());
    }

    #[test]
    fn logical_breaks_wall_ties() {
        let newer = MvccKey::new(Bytes::from_static(b"a"), Timestamp::new(5, 2));
        let older = MvccKey::new(Bytes::from_static(b"a"), Timestamp::new(5, 1));
        assert!(newer < older);
    }

    #[test]
    fn encode_roundtrip() {
        let k = MvccKey::new(Bytes::from_static(b"hello"), Timestamp::new(42, 7));
        let enc = Bytes::from(k.encode_to_vec());
        let (dec, used) = MvccKey::decode(&enc).unwrap();
        assert_eq!(used, enc.len());
        assert_eq!(dec, k);
    }

    #[test]
    fn decode_rejects_truncated() {
        let k = key(b"hello", 1);
        let enc = k.encode_to_vec();
        let cut = Bytes::copy_from_slice(&enc[..enc.len() - 1]);
        assert_eq!(MvccKey::decode(&cut), Err(DecodeError::BadKeyLength(5)));
        assert_eq!(
            MvccKey::decode(&Bytes::from_static(b"\x01")),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn system_keys() {
        assert!(is_system_key(b"\x01range-desc"));
        assert!(!is_system_key(b"\x02"));
        assert!(!is_system_key(b"user"));
    }
}

//! SSTable (Sorted String Table) format, held entirely in memory.
//!
//! Tables arrive as opaque byte buffers in ingestion requests, so both the
//! builder and the reader work on `Bytes` rather than files.
//!
//! Layout:
//! ```text
//! [data blocks...]
//! [index block]
//! [properties block]
//! [footer]
//! [magic]
//! ```
//!
//! Data block format:
//! ```text
//! [count u32]
//! repeated count times:
//!   [mvcc_key]
//!   [val_len u32][val bytes]
//! [trailer]
//! ```
//!
//! Trailer format:
//! - crc32c(u32) over block payload (everything before trailer)
//! - blake3(32 bytes) over block payload
//!
//! Index block entries map `last_mvcc_key_in_block -> {offset,len}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::integrity::{BlockCrc32c, BlockHash, RecordHasher};
use crate::mvcc_key::{pretty_key, MvccKey, Timestamp};

mod builder;
mod iter;

pub use builder::SstBuilder;
pub use iter::SstIter;

pub type DataBlockEntries = Vec<(MvccKey, Bytes)>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SstError {
    #[error("decode error: {0}")]
    Decode(#[from] crate::mvcc_key::DecodeError),

    #[error("sst corrupt: {0}")]
    Corrupt(&'static str),

    #[error("key {key} out of order after {prev}")]
    OutOfOrder { key: String, prev: String },
}

impl SstError {
    fn out_of_order(key: &MvccKey, prev: &MvccKey) -> Self {
        Self::OutOfOrder {
            key: format!("{} @ {}", pretty_key(&key.key), key.timestamp),
            prev: format!("{} @ {}", pretty_key(&prev.key), prev.timestamp),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRoot(pub [u8; 32]);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SstProperties {
    pub smallest_key: Bytes,
    pub largest_key: Bytes,
    pub max_timestamp: Timestamp,
    pub entries: u64,
    pub data_bytes: u64,
    pub index_bytes: u64,
    pub table_root: TableRoot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BlockHandle {
    offset: u64,
    len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    last_key: MvccKey,
    handle: BlockHandle,
}

#[derive(Debug, Clone)]
struct Footer {
    index_offset: u64,
    index_len: u32,
    props_offset: u64,
    props_len: u32,
    table_root: TableRoot,
}

pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

const MAGIC: &[u8; 8] = b"SSTINGS1";
// Footer is appended after the properties block.
//
// Layout:
// - index_offset (u64)
// - index_len (u32)
// - props_offset (u64)
// - props_len (u32)
// - table_root (32 bytes)
const FOOTER_SIZE: usize = 8 + 4 + 8 + 4 + 32;
const BLOCK_TRAILER_SIZE: usize = 4 + 32;

fn verified_block_payload(block: &Bytes) -> Result<Bytes, SstError> {
    if block.len() <= BLOCK_TRAILER_SIZE {
        return Err(SstError::Corrupt("block too small"));
    }

    let payload_end = block.len() - BLOCK_TRAILER_SIZE;
    let payload = block.slice(..payload_end);
    let crc_expected =
        u32::from_le_bytes(block[payload_end..(payload_end + 4)].try_into().unwrap());
    let hash_expected: [u8; 32] = block[(payload_end + 4)..].try_into().unwrap();

    if !RecordHasher::verify_crc32c(&payload, BlockCrc32c(crc_expected)) {
        return Err(SstError::Corrupt("block crc mismatch"));
    }
    if !RecordHasher::verify_blake3(&payload, BlockHash(hash_expected)) {
        return Err(SstError::Corrupt("block hash mismatch"));
    }

    Ok(payload)
}

/// Decodes a block's records. Keys must be strictly increasing within the
/// block; seeks binary-search the result.
fn decode_block_entries(payload: &Bytes) -> Result<DataBlockEntries, SstError> {
    if payload.len() < 4 {
        return Err(SstError::Corrupt("block payload too small"));
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let mut offset = 4usize;
    let mut out = Vec::with_capacity(count.min(payload.len()));
    for _ in 0..count {
        let (key, used) = MvccKey::decode(&payload.slice(offset..))?;
        if let Some((prev, _)) = out.last() {
            if &key <= prev {
                return Err(SstError::out_of_order(&key, prev));
            }
        }
        offset += used;
        if offset + 4 > payload.len() {
            return Err(SstError::Corrupt("truncated value"));
        }
        let val_len =
            u32::from_le_bytes(payload[offset..(offset + 4)].try_into().unwrap()) as usize;
        offset += 4;
        if offset + val_len > payload.len() {
            return Err(SstError::Corrupt("truncated value bytes"));
        }
        out.push((key, payload.slice(offset..(offset + val_len))));
        offset += val_len;
    }
    if offset != payload.len() {
        return Err(SstError::Corrupt("trailing bytes in block"));
    }
    Ok(out)
}

/// Parsed view over an in-memory table.
#[derive(Debug, Clone)]
pub struct SstReader {
    data: Bytes,
    index: Vec<IndexEntry>,
    props: SstProperties,
}

impl SstReader {
    pub fn open(data: Bytes) -> Result<Self, SstError> {
        if data.len() < MAGIC.len() + FOOTER_SIZE {
            return Err(SstError::Corrupt("table too small"));
        }

        let footer_offset = data.len() - (MAGIC.len() + FOOTER_SIZE);
        if &data[(data.len() - MAGIC.len())..] != MAGIC {
            return Err(SstError::Corrupt("bad magic"));
        }
        let footer = decode_footer(&data[footer_offset..(footer_offset + FOOTER_SIZE)])?;

        let bad_offsets = SstError::Corrupt("bad footer offsets");
        let index_start = usize::try_from(footer.index_offset).map_err(|_| bad_offsets.clone())?;
        let index_end = index_start
            .checked_add(footer.index_len as usize)
            .ok_or_else(|| bad_offsets.clone())?;
        let props_start = usize::try_from(footer.props_offset).map_err(|_| bad_offsets.clone())?;
        let props_end = props_start
            .checked_add(footer.props_len as usize)
            .ok_or_else(|| bad_offsets.clone())?;
        if index_end > footer_offset || props_end > footer_offset {
            return Err(bad_offsets);
        }

        let index: Vec<IndexEntry> = bincode::deserialize(&data[index_start..index_end])
            .map_err(|_| SstError::Corrupt("index decode"))?;
        let props: SstProperties = bincode::deserialize(&data[props_start..props_end])
            .map_err(|_| SstError::Corrupt("props decode"))?;
        if props.table_root != footer.table_root {
            return Err(SstError::Corrupt("table root mismatch"));
        }
        check_index(&index, index_start as u64)?;

        Ok(Self { data, index, props })
    }

    pub fn properties(&self) -> &SstProperties {
        &self.props
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Forward iterator over every record; `verify` checks each value.
    pub fn iter(self, verify: bool) -> SstIter {
        SstIter::new(self, verify)
    }

    /// Index of the first block that may contain `target`.
    fn find_block(&self, target: &MvccKey) -> usize {
        let mut lo = 0usize;
        let mut hi = self.index.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if &self.index[mid].last_key < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn read_block(&self, block_no: usize) -> Result<DataBlockEntries, SstError> {
        let handle = self
            .index
            .get(block_no)
            .ok_or(SstError::Corrupt("block index out of range"))?
            .handle;
        let start = handle.offset as usize;
        let end = start + handle.len as usize;
        if end > self.data.len() {
            return Err(SstError::Corrupt("block handle out of bounds"));
        }
        let payload = verified_block_payload(&self.data.slice(start..end))?;
        let entries = decode_block_entries(&payload)?;
        match entries.last() {
            Some((last, _)) if last == &self.index[block_no].last_key => {}
            _ => return Err(SstError::Corrupt("block last key does not match index")),
        }
        // The block must start after everything the previous block holds.
        if let (Some(prev), Some((first, _))) = (
            block_no.checked_sub(1).map(|i| &self.index[i].last_key),
            entries.first(),
        ) {
            if first <= prev {
                return Err(SstError::out_of_order(first, prev));
            }
        }
        Ok(entries)
    }
}

/// Index keys must be strictly increasing and block handles must follow one
/// another without overlap, ending before the index block.
fn check_index(index: &[IndexEntry], index_start: u64) -> Result<(), SstError> {
    let mut next_offset = 0u64;
    let mut prev_key: Option<&MvccKey> = None;
    for entry in index {
        if let Some(prev) = prev_key {
            if &entry.last_key <= prev {
                return Err(SstError::out_of_order(&entry.last_key, prev));
            }
        }
        prev_key = Some(&entry.last_key);

        if entry.handle.offset < next_offset {
            return Err(SstError::Corrupt("overlapping block handles"));
        }
        next_offset = entry
            .handle
            .offset
            .checked_add(u64::from(entry.handle.len))
            .ok_or(SstError::Corrupt("block handle out of bounds"))?;
        if next_offset > index_start {
            return Err(SstError::Corrupt("block handle out of bounds"));
        }
    }
    Ok(())
}

fn encode_footer(footer: &Footer) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FOOTER_SIZE + MAGIC.len());
    buf.extend_from_slice(&footer.index_offset.to_le_bytes());
    buf.extend_from_slice(&footer.index_len.to_le_bytes());
    buf.extend_from_slice(&footer.props_offset.to_le_bytes());
    buf.extend_from_slice(&footer.props_len.to_le_bytes());
    buf.extend_from_slice(&footer.table_root.0);
    debug_assert_eq!(buf.len(), FOOTER_SIZE);
    buf
}

fn decode_footer(input: &[u8]) -> Result<Footer, SstError> {
    if input.len() != FOOTER_SIZE {
        return Err(SstError::Corrupt("bad footer size"));
    }
    let index_offset = u64::from_le_bytes(input[0..8].try_into().unwrap());
    let index_len = u32::from_le_bytes(input[8..12].try_into().unwrap());
    let props_offset = u64::from_le_bytes(input[12..20].try_into().unwrap());
    let props_len = u32::from_le_bytes(input[20..24].try_into().unwrap());
    let table_root: [u8; 32] = input[24..56].try_into().unwrap();
    Ok(Footer {
        index_offset,
        index_len,
        props_offset,
        props_len,
        table_root: TableRoot(table_root),
    })
}

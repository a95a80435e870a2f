//! Integrity and verification helpers.
//!
//! sstingest uses:
//! - `crc32c` for per-block and per-value corruption detection.
//! - `blake3` block hashes folded into a table root.
//! - CRC-32 (IEEE) for the whole-table checksum handed to replication.

use crate::sst::TableRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCrc32c(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHash(pub [u8; 32]);

#[derive(Debug, Clone)]
pub struct RecordHasher;

impl RecordHasher {
    pub fn crc32c(data: &[u8]) -> BlockCrc32c {
        BlockCrc32c(crc32c::crc32c(data))
    }

    pub fn blake3(data: &[u8]) -> BlockHash {
        BlockHash(*blake3::hash(data).as_bytes())
    }

    pub fn verify_crc32c(data: &[u8], expected: BlockCrc32c) -> bool {
        Self::crc32c(data) == expected
    }

    pub fn verify_blake3(data: &[u8], expected: BlockHash) -> bool {
        Self::blake3(data) == expected
    }
}

/// Checksum of a value's tagged payload, seeded with the key it is stored
/// under so a value copied onto the wrong key fails verification.
///
/// Zero is reserved for "no checksum"; a computed zero is mapped to one.
pub fn value_checksum(key: &[u8], tagged_payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c_append(crc32c::crc32c(key), tagged_payload);
    if crc == 0 {
        1
    } else {
        crc
    }
}

/// Stable 32-bit checksum over a whole table, computed once at evaluation and
/// re-checked by replicas before linking the table in.
pub fn checksum32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[derive(Debug, Clone)]
pub struct TableRootBuilder {
    hasher: blake3::Hasher,
}

impl Default for TableRootBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableRootBuilder {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    pub fn update_block_hash(&mut self, hash: BlockHash) {
        self.hasher.update(&hash.0);
    }

    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> TableRoot {
        TableRoot(*self.hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_helpers_round_trip() {
        let data = b"hello";
        let crc = RecordHasher::crc32c(data);
        let hash = RecordHasher::blake3(data);
        assert!(RecordHasher::verify_crc32c(data, crc));
        assert!(RecordHasher::verify_blake3(data, hash));
        assert!(!RecordHasher::verify_crc32c(b"hellp", crc));
    }

    #[test]
    fn checksum32_is_deterministic() {
        let data = b"sstable bytes";
        assert_eq!(checksum32(data), checksum32(data));
        assert_ne!(checksum32(data), checksum32(b"sstable bytez"));
        // CRC-32/IEEE check value.
        assert_eq!(checksum32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn value_checksum_depends_on_key() {
        let payload = b"\x03payload";
        assert_ne!(value_checksum(b"a", payload), value_checksum(b"b", payload));
        assert_ne!(value_checksum(b"a", payload), 0);
    }

    #[test]
    fn table_root_builder_accumulates() {
        let mut builder = TableRootBuilder::new();
        builder.update_block_hash(RecordHasher::blake3(b"a"));
        builder.update_block_hash(RecordHasher::blake3(b"b"));
        let root1 = builder.finalize();

        let mut builder2 = TableRootBuilder::new();
        builder2.update_bytes(RecordHasher::blake3(b"a").0.as_ref());
        builder2.update_bytes(RecordHasher::blake3(b"b").0.as_ref());
        let root2 = builder2.finalize();

        assert_eq!(root1, root2);
    }
}

use super::*;

use crate::integrity::TableRootBuilder;

/// Writes a table into an in-memory buffer.
pub struct SstBuilder {
    block_size: usize,
    out: Vec<u8>,
    buf: Vec<u8>,
    entries_in_block: u32,
    last_key: Option<MvccKey>,
    index: Vec<IndexEntry>,
    smallest_key: Option<Bytes>,
    largest_key: Option<Bytes>,
    max_timestamp: Timestamp,
    entries: u64,
    data_bytes: u64,
    table_root: TableRootBuilder,
}

impl SstBuilder {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            out: Vec::new(),
            buf: Vec::with_capacity(block_size + 256),
            entries_in_block: 0,
            last_key: None,
            index: Vec::new(),
            smallest_key: None,
            largest_key: None,
            max_timestamp: Timestamp::ZERO,
            entries: 0,
            data_bytes: 0,
            table_root: TableRootBuilder::new(),
        }
    }

    /// Appends a record. Keys must arrive in strictly increasing order.
    ///
    /// `value` is stored as given; callers that want verifiable values encode
    /// them with [`crate::value::encode`].
    pub fn add(&mut self, key: &MvccKey, value: &[u8]) -> Result<(), SstError> {
        if let Some(last) = &self.last_key {
            if key <= last {
                return Err(SstError::Corrupt(
                    "mvcc keys must be added in strictly increasing order",
                ));
            }
        }

        if self.smallest_key.is_none() {
            self.smallest_key = Some(key.key.clone());
        }
        self.largest_key = Some(key.key.clone());
        self.last_key = Some(key.clone());
        self.max_timestamp = self.max_timestamp.max(key.timestamp);
        self.entries += 1;

        if self.entries_in_block == 0 {
            self.buf.extend_from_slice(&0u32.to_le_bytes());
        }
        key.encode_into(&mut self.buf);
        let val_len: u32 = value
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("value too large"))?;
        self.buf.extend_from_slice(&val_len.to_le_bytes());
        self.buf.extend_from_slice(value);
        self.entries_in_block += 1;
        self.buf[0..4].copy_from_slice(&self.entries_in_block.to_le_bytes());

        if self.buf.len() >= self.block_size {
            self.flush_block()?;
        }

        Ok(())
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn finish(mut self) -> Result<(Bytes, SstProperties), SstError> {
        if self.entries_in_block > 0 {
            self.flush_block()?;
        }

        let index_offset = self.out.len() as u64;
        let index_bytes =
            bincode::serialize(&self.index).map_err(|_| SstError::Corrupt("index serialize"))?;
        self.out.extend_from_slice(&index_bytes);
        let index_len: u32 = index_bytes
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("index too large"))?;

        let props_offset = self.out.len() as u64;
        self.table_root.update_bytes(&index_bytes);
        let table_root = self.table_root.finalize();
        let props = SstProperties {
            smallest_key: self.smallest_key.unwrap_or_default(),
            largest_key: self.largest_key.unwrap_or_default(),
            max_timestamp: self.max_timestamp,
            entries: self.entries,
            data_bytes: self.data_bytes,
            index_bytes: index_bytes.len() as u64,
            table_root,
        };
        let props_bytes =
            bincode::serialize(&props).map_err(|_| SstError::Corrupt("props serialize"))?;
        let props_len: u32 = props_bytes
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("props too large"))?;
        self.out.extend_from_slice(&props_bytes);

        let footer = Footer {
            index_offset,
            index_len,
            props_offset,
            props_len,
            table_root,
        };
        self.out.extend_from_slice(&encode_footer(&footer));
        self.out.extend_from_slice(MAGIC);
        Ok((Bytes::from(self.out), props))
    }

    fn flush_block(&mut self) -> Result<(), SstError> {
        let payload_len = self.buf.len();
        let crc = RecordHasher::crc32c(&self.buf);
        let hash = RecordHasher::blake3(&self.buf);
        self.table_root.update_block_hash(hash);
        self.buf.extend_from_slice(&crc.0.to_le_bytes());
        self.buf.extend_from_slice(&hash.0);

        let offset = self.out.len() as u64;
        let len: u32 = self
            .buf
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("block too large"))?;
        self.out.extend_from_slice(&self.buf);

        let last_key = self
            .last_key
            .clone()
            .ok_or(SstError::Corrupt("missing last key"))?;
        self.index.push(IndexEntry {
            last_key,
            handle: BlockHandle { offset, len },
        });

        self.data_bytes += payload_len as u64;
        self.buf.clear();
        self.entries_in_block = 0;
        Ok(())
    }
}

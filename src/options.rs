use crate::sst::DEFAULT_BLOCK_SIZE;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Check every incoming record's value checksum while iterating the
    /// table. Key order is always checked when blocks are decoded.
    pub verify_values: bool,
    /// Target data block size for tables built by this crate.
    pub block_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            verify_values: true,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

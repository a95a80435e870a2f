use bytes::Bytes;

use crate::iter::{IterError, MvccIterator, RecordView};
use crate::mvcc_key::MvccKey;
use crate::value;

use super::{DataBlockEntries, SstReader};

/// Forward iterator over an in-memory table.
///
/// Blocks are decoded one at a time and rejected unless their keys are in
/// strict order. With `verify` set, every record the iterator lands on also
/// has its value checked. The first failure is latched and reported by every
/// later `current()`.
pub struct SstIter {
    reader: SstReader,
    verify: bool,
    index_pos: usize,
    entries: DataBlockEntries,
    entry_pos: usize,
    err: Option<IterError>,
}

impl SstIter {
    pub(super) fn new(reader: SstReader, verify: bool) -> Self {
        Self {
            reader,
            verify,
            index_pos: 0,
            entries: Vec::new(),
            entry_pos: 0,
            err: None,
        }
    }

    /// Opens `data` as a table and returns an unpositioned iterator over it.
    pub fn open(data: Bytes, verify: bool) -> Result<Self, IterError> {
        Ok(SstReader::open(data)?.iter(verify))
    }

    pub fn seek_to_first(&mut self) {
        self.seek(&MvccKey::min());
    }

    /// Loads blocks until positioned on an entry or past the last block.
    fn settle(&mut self, seek_target: Option<&MvccKey>) {
        let mut seek_target = seek_target;
        while self.entry_pos >= self.entries.len() {
            if self.index_pos >= self.reader.block_count() {
                self.entries.clear();
                self.entry_pos = 0;
                return;
            }
            match self.reader.read_block(self.index_pos) {
                Ok(entries) => {
                    self.entries = entries;
                    self.entry_pos = 0;
                    if let Some(target) = seek_target.take() {
                        self.entry_pos =
                            match self.entries.binary_search_by(|(k, _)| k.cmp(target)) {
                                Ok(i) | Err(i) => i,
                            };
                    }
                }
                Err(e) => {
                    self.err = Some(e.into());
                    return;
                }
            }
            self.index_pos += 1;
        }

        if self.verify {
            self.check_current();
        }
    }

    fn check_current(&mut self) {
        let (key, val) = &self.entries[self.entry_pos];
        if let Err(e) = value::verify(&key.key, val) {
            self.err = Some(e.into());
        }
    }
}

impl MvccIterator for SstIter {
    fn seek(&mut self, key: &MvccKey) {
        if self.err.is_some() {
            return;
        }
        self.index_pos = self.reader.find_block(key);
        self.entries.clear();
        self.entry_pos = 0;
        self.settle(Some(key));
    }

    fn next(&mut self) {
        if self.err.is_some() || self.entry_pos >= self.entries.len() {
            return;
        }
        self.entry_pos += 1;
        self.settle(None);
    }

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        Ok(self
            .entries
            .get(self.entry_pos)
            .map(|(key, value)| RecordView::new(key.as_key_ref(), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc_key::Timestamp;
    use crate::sst::SstBuilder;

    fn key(k: &'static [u8], wall: i64) -> MvccKey {
        MvccKey::new(Bytes::from_static(k), Timestamp::from_wall(wall))
    }

    fn table(entries: &[(MvccKey, Bytes)]) -> Bytes {
        let mut builder = SstBuilder::new(32);
        for (k, v) in entries {
            builder.add(k, v).unwrap();
        }
        builder.finish().unwrap().0
    }

    fn collect(iter: &mut SstIter) -> Vec<MvccKey> {
        let mut out = Vec::new();
        while let Some(rec) = iter.current().unwrap() {
            out.push(rec.key.to_owned());
            iter.next();
        }
        out
    }

    #[test]
    fn seek_lands_on_first_version_of_key() {
        let keys = [key(b"a", 3), key(b"b", 9), key(b"b", 4), key(b"c", 1)];
        let entries: Vec<_> = keys
            .iter()
            .map(|k| (k.clone(), value::encode_bytes(&k.key, b"v")))
            .collect();
        let mut iter = SstIter::open(table(&entries), true).unwrap();

        iter.seek(&MvccKey::seek_key(Bytes::from_static(b"b")));
        assert_eq!(collect(&mut iter), keys[1..].to_vec());

        iter.seek(&MvccKey::seek_key(Bytes::from_static(b"bb")));
        assert_eq!(collect(&mut iter), vec![key(b"c", 1)]);

        iter.seek(&MvccKey::seek_key(Bytes::from_static(b"d")));
        assert!(iter.current().unwrap().is_none());

        iter.seek_to_first();
        assert_eq!(collect(&mut iter), keys.to_vec());
    }

    #[test]
    fn verify_latches_bad_value() {
        let good = value::encode_bytes(b"a", b"v");
        let bad = value::encode_bytes(b"zzz", b"v");
        let mut iter =
            SstIter::open(table(&[(key(b"a", 1), good), (key(b"b", 1), bad)]), true).unwrap();
        iter.seek_to_first();
        assert!(iter.current().unwrap().is_some());
        iter.next();
        let err = iter.current().unwrap_err();
        assert!(matches!(err, IterError::Value(_)), "{err}");
        iter.next();
        assert!(iter.current().is_err());
    }

    #[test]
    fn unverified_iteration_ignores_values() {
        let bad = Bytes::from_static(b"\x00");
        let mut iter = SstIter::open(table(&[(key(b"a", 1), bad)]), false).unwrap();
        iter.seek_to_first();
        assert_eq!(iter.current().unwrap().unwrap().value, b"\x00");
    }
}

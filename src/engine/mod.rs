//! In-memory MVCC store backing a range.
//!
//! Records live in a lock-free skiplist ordered by [`MvccKey`]. Iterators walk
//! the skiplist lazily, so seeking into an empty span touches no records.

use std::ops::Bound;

use bytes::Bytes;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;

use crate::iter::{IterError, IterOptions, MvccIterator, Reader, RecordView};
use crate::mvcc_key::{MvccKey, Timestamp};
use crate::sst::SstIter;
use crate::value;

#[derive(Debug, Default)]
pub struct MemEngine {
    map: SkipMap<MvccKey, Bytes>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw record, replacing any record at the same key and timestamp.
    pub fn put_raw(&self, key: MvccKey, raw: Bytes) {
        self.map.insert(key, raw);
    }

    /// Stores a checksummed bytes value at `timestamp`.
    pub fn put(&self, key: impl Into<Bytes>, timestamp: Timestamp, payload: &[u8]) {
        let key = key.into();
        let raw = value::encode_bytes(&key, payload);
        self.put_raw(MvccKey::new(key, timestamp), raw);
    }

    /// Writes a deletion tombstone at `timestamp`.
    pub fn delete(&self, key: impl Into<Bytes>, timestamp: Timestamp) {
        self.put_raw(MvccKey::new(key, timestamp), Bytes::new());
    }

    /// Stores an unversioned value.
    pub fn put_inline(&self, key: impl Into<Bytes>, payload: &[u8]) {
        self.put(key, Timestamp::ZERO, payload);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &MvccKey) -> Option<Bytes> {
        self.map.get(key).map(|e| e.value().clone())
    }

    /// Links every record of a verified table into the store. Records at an
    /// existing key and timestamp replace the stored one.
    pub fn ingest_sst(&self, data: Bytes) -> Result<u64, IterError> {
        let mut iter = SstIter::open(data, true)?;
        iter.seek_to_first();
        let mut applied = 0u64;
        while let Some(rec) = iter.current()? {
            let (key, raw) = rec.to_owned();
            self.put_raw(key, raw);
            applied += 1;
            iter.next();
        }
        Ok(applied)
    }

    pub fn iter(&self, opts: IterOptions) -> EngineIter<'_> {
        EngineIter {
            map: &self.map,
            upper_bound: opts.upper_bound,
            current: None,
        }
    }
}

impl Reader for MemEngine {
    fn new_iterator(&self, opts: IterOptions) -> Box<dyn MvccIterator + '_> {
        Box::new(self.iter(opts))
    }
}

/// Cursor over a [`MemEngine`]. Holding it pins the current skiplist node.
pub struct EngineIter<'a> {
    map: &'a SkipMap<MvccKey, Bytes>,
    upper_bound: Option<Bytes>,
    current: Option<Entry<'a, MvccKey, Bytes>>,
}

impl<'a> EngineIter<'a> {
    fn bounded(
        &self,
        entry: Option<Entry<'a, MvccKey, Bytes>>,
    ) -> Option<Entry<'a, MvccKey, Bytes>> {
        let entry = entry?;
        match &self.upper_bound {
            Some(bound) if entry.key().key.as_ref() >= bound.as_ref() => None,
            _ => Some(entry),
        }
    }
}

impl MvccIterator for EngineIter<'_> {
    fn seek(&mut self, key: &MvccKey) {
        let map = self.map;
        let entry = map.lower_bound(Bound::Included(key));
        self.current = self.bounded(entry);
    }

    fn next(&mut self) {
        let next = self.current.take().and_then(|e| e.next());
        self.current = self.bounded(next);
    }

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError> {
        Ok(self
            .current
            .as_ref()
            .map(|e| RecordView::new(e.key().as_key_ref(), e.value())))
    }
}

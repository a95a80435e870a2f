//! Record stream abstraction shared by existing range data and incoming
//! tables.
//!
//! An [`MvccIterator`] is a seekable forward cursor. [`RecordView`] borrows
//! from the iterator, so the borrow checker guarantees a view never outlives
//! the next `seek` or `next` call; anything needed past that point must be
//! copied out (see [`RecordView::to_owned`]).

use bytes::Bytes;

use crate::mvcc_key::{MvccKey, MvccKeyRef};
use crate::sst::{SstError, SstIter};
use crate::value::ValueError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IterError {
    #[error(transparent)]
    Sst(#[from] SstError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("iteration cancelled")]
    Cancelled,
}

impl IterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Borrowed view of the record an iterator is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    pub key: MvccKeyRef<'a>,
    pub value: &'a [u8],
}

impl<'a> RecordView<'a> {
    pub fn new(key: MvccKeyRef<'a>, value: &'a [u8]) -> Self {
        Self { key, value }
    }

    pub fn to_owned(&self) -> (MvccKey, Bytes) {
        (self.key.to_owned(), Bytes::copy_from_slice(self.value))
    }
}

/// Seekable, forward-only cursor over MVCC records in `MvccKey` order.
///
/// After `seek` or `next`, `current` reports one of: positioned on a record,
/// exhausted (`Ok(None)`), or failed. Failures are sticky.
pub trait MvccIterator {
    /// Positions on the first record `>= key`.
    fn seek(&mut self, key: &MvccKey);

    /// Advances past the current record. No-op once exhausted or failed.
    fn next(&mut self);

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError>;
}

impl<I: MvccIterator + ?Sized> MvccIterator for &mut I {
    fn seek(&mut self, key: &MvccKey) {
        (**self).seek(key)
    }

    fn next(&mut self) {
        (**self).next()
    }

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError> {
        (**self).current()
    }
}

impl<I: MvccIterator + ?Sized> MvccIterator for Box<I> {
    fn seek(&mut self, key: &MvccKey) {
        (**self).seek(key)
    }

    fn next(&mut self) {
        (**self).next()
    }

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError> {
        (**self).current()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Exclusive upper bound on raw keys; the iterator reports exhaustion at
    /// the first record at or past it.
    pub upper_bound: Option<Bytes>,
}

/// Read access to a range's storage.
///
/// Iterators are scoped resources: dropping one releases whatever it holds
/// open against the engine.
pub trait Reader {
    fn new_iterator(&self, opts: IterOptions) -> Box<dyn MvccIterator + '_>;

    /// Cursor over a table held in memory.
    fn new_sst_iterator(
        &self,
        data: Bytes,
        verify: bool,
    ) -> Result<Box<dyn MvccIterator + '_>, IterError> {
        Ok(Box::new(SstIter::open(data, verify)?))
    }
}

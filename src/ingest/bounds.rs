use crate::iter::MvccIterator;
use crate::mvcc_key::{pretty_key, MvccKey};

use super::error::{IngestError, RangeViolation, Stream};
use super::KeyRange;

/// Rejects a table whose first record sorts before `span.start`.
///
/// Seeks to the minimum key rather than to `start` so the true first record
/// is observed. An empty table passes.
pub(super) fn check_first_key<I: MvccIterator + ?Sized>(
    incoming: &mut I,
    span: &KeyRange,
) -> Result<(), IngestError> {
    incoming.seek(&MvccKey::min());
    match incoming.current() {
        Err(e) => Err(IngestError::from_iter(Stream::Incoming, e)),
        Ok(Some(rec)) if rec.key.key < span.start().as_ref() => Err(IngestError::OutOfRange {
            violation: RangeViolation::Precedes,
            key: pretty_key(rec.key.key),
            span: span.clone(),
        }),
        Ok(_) => Ok(()),
    }
}

/// Rejects a table holding any record at or past `span.end`.
///
/// Runs after the merged pass; that pass stops at `end`, so the tail is
/// confirmed with a fresh seek.
pub(super) fn check_last_key<I: MvccIterator + ?Sized>(
    incoming: &mut I,
    span: &KeyRange,
) -> Result<(), IngestError> {
    incoming.seek(&MvccKey::seek_key(span.end().clone()));
    match incoming.current() {
        Err(e) => Err(IngestError::from_iter(Stream::Incoming, e)),
        Ok(Some(rec)) if rec.key.key >= span.end().as_ref() => Err(IngestError::OutOfRange {
            violation: RangeViolation::Exceeds,
            key: pretty_key(rec.key.key),
            span: span.clone(),
        }),
        Ok(_) => Ok(()),
    }
}

//! Caller-driven cancellation observed at stream-advance boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::iter::{IterError, MvccIterator, RecordView};
use crate::mvcc_key::MvccKey;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Iterator adaptor that checks a [`CancelToken`] before every `seek` and
/// `next`. Once cancellation is observed the adaptor latches
/// [`IterError::Cancelled`] and stops driving the inner iterator.
pub struct Cancellable<I> {
    inner: I,
    token: CancelToken,
    cancelled: bool,
}

impl<I: MvccIterator> Cancellable<I> {
    pub fn new(inner: I, token: CancelToken) -> Self {
        Self {
            inner,
            token,
            cancelled: false,
        }
    }

    fn observe(&mut self) -> bool {
        if !self.cancelled && self.token.is_cancelled() {
            self.cancelled = true;
        }
        self.cancelled
    }
}

impl<I: MvccIterator> MvccIterator for Cancellable<I> {
    fn seek(&mut self, key: &MvccKey) {
        if !self.observe() {
            self.inner.seek(key);
        }
    }

    fn next(&mut self) {
        if !self.observe() {
            self.inner.next();
        }
    }

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError> {
        if self.cancelled {
            return Err(IterError::Cancelled);
        }
        self.inner.current()
    }
}

//! AddSSTable evaluation: verify an incoming table against its destination
//! range and derive the statistics delta its ingestion causes.
//!
//! Evaluation is a single linear pass:
//!
//! 1. Open the table and reject it if its first key precedes the range.
//! 2. Compute stats over the existing data in `[start, end)`.
//! 3. Compute stats over existing data merged with the table, the table
//!    winning exact key and timestamp collisions. This pass also verifies
//!    every in-range record of the table.
//! 4. Re-seek the table to `end` and reject it if anything is found there.
//! 5. Return the table, its checksum and `merged - existing`.
//!
//! Both streams are owned by the evaluation and dropped on every exit path.

mod bounds;
mod error;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::{CancelToken, Cancellable};
use crate::integrity::checksum32;
use crate::iter::{IterOptions, MvccIterator, Reader};
use crate::merge::MultiIterator;
use crate::mvcc_key::{pretty_key, MvccKey, Timestamp};
use crate::options::IngestOptions;
use crate::stats::{compute_stats, MvccStats};

pub use error::{IngestError, RangeViolation, StatsPass, Stream};

/// Half-open key span `[start, end)` with `start < end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    start: Bytes,
    end: Bytes,
}

impl KeyRange {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Result<Self, IngestError> {
        let start = start.into();
        let end = end.into();
        if start >= end {
            return Err(IngestError::InvalidRange {
                start: pretty_key(&start),
                end: pretty_key(&end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> &Bytes {
        &self.start
    }

    pub fn end(&self) -> &Bytes {
        &self.end
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.start.as_ref() <= key && key < self.end.as_ref()
    }

    pub fn contains(&self, other: &KeyRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", pretty_key(&self.start), pretty_key(&self.end))
    }
}

#[derive(Debug, Clone)]
pub struct AddSstableRequest {
    pub span: KeyRange,
    pub data: Bytes,
    /// Stats are computed as of this time.
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSstableResult {
    /// The request's table, unmodified.
    pub data: Bytes,
    pub crc32: u32,
    pub stats_delta: MvccStats,
}

impl AddSstableResult {
    fn new(data: Bytes, stats_delta: MvccStats) -> Self {
        let crc32 = checksum32(&data);
        Self {
            data,
            crc32,
            stats_delta,
        }
    }
}

/// Everything evaluation reads besides the request itself.
pub struct EvalContext<'a> {
    pub reader: &'a dyn Reader,
    pub options: IngestOptions,
    pub cancel: CancelToken,
}

impl<'a> EvalContext<'a> {
    pub fn new(reader: &'a dyn Reader) -> Self {
        Self {
            reader,
            options: IngestOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Evaluates an AddSSTable request against the range data visible through
/// `ctx.reader`. On success the caller adds `stats_delta` to its running
/// stats; on failure nothing is to be applied.
pub fn eval_add_sstable(
    ctx: &EvalContext<'_>,
    req: &AddSstableRequest,
) -> Result<AddSstableResult, IngestError> {
    debug!(span = %req.span, bytes = req.data.len(), "evaluating AddSSTable");
    let result = evaluate(ctx, req);
    if let Err(err) = &result {
        if !err.is_cancelled() {
            warn!(span = %req.span, error = %err, "rejected AddSSTable");
        }
    }
    result
}

fn evaluate(
    ctx: &EvalContext<'_>,
    req: &AddSstableRequest,
) -> Result<AddSstableResult, IngestError> {
    let span = &req.span;
    let start = span.start().as_ref();
    let end = span.end().as_ref();
    let now = req.timestamp.wall_time;

    let incoming = ctx
        .reader
        .new_sst_iterator(req.data.clone(), ctx.options.verify_values)
        .map_err(|e| IngestError::from_iter(Stream::Incoming, e))?;
    let mut incoming = Cancellable::new(incoming, ctx.cancel.clone());
    bounds::check_first_key(&mut incoming, span)?;

    let existing = ctx.reader.new_iterator(IterOptions {
        upper_bound: Some(span.end().clone()),
    });
    let mut existing = Cancellable::new(existing, ctx.cancel.clone());
    existing.seek(&MvccKey::seek_key(span.start().clone()));
    match existing.current() {
        Err(e) => return Err(IngestError::from_iter(Stream::Existing, e)),
        Ok(Some(_)) => debug!(span = %span, "target span not empty, merging existing data with table"),
        Ok(None) => {}
    }

    let existing_stats = compute_stats(&mut existing, start, end, now)
        .map_err(|e| IngestError::from_stats(StatsPass::Existing, Stream::Existing, e))?;
    if existing_stats.key_count > 0 {
        info!(
            keys = existing_stats.key_count,
            bytes = existing_stats.total(),
            span = %span,
            "table overwrites existing keys"
        );
    }

    let merged = {
        let mut merged = MultiIterator::new(vec![
            &mut existing as &mut dyn MvccIterator,
            &mut incoming,
        ]);
        compute_stats(&mut merged, start, end, now)
    };
    let merged_stats = merged.map_err(|e| {
        let stream = if incoming.current().is_err() {
            Stream::Incoming
        } else {
            Stream::Existing
        };
        IngestError::from_stats(StatsPass::Merged, stream, e)
    })?;

    bounds::check_last_key(&mut incoming, span)?;

    let mut delta = merged_stats;
    delta.subtract(&existing_stats);
    Ok(AddSstableResult::new(req.data.clone(), delta))
}

use std::fmt;

use crate::iter::IterError;
use crate::stats::StatsError;

use super::KeyRange;

/// Which input a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Existing,
    Incoming,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Existing => f.write_str("existing range data"),
            Stream::Incoming => f.write_str("incoming table"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeViolation {
    /// The table's first key sorts before the range start.
    Precedes,
    /// The table holds a key at or past the range end.
    Exceeds,
}

impl RangeViolation {
    fn edge(&self) -> &'static str {
        match self {
            RangeViolation::Precedes => "first",
            RangeViolation::Exceeds => "last",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPass {
    Existing,
    Merged,
}

impl fmt::Display for StatsPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsPass::Existing => f.write_str("existing"),
            StatsPass::Merged => f.write_str("merged"),
        }
    }
}

/// Why an ingestion was rejected. Every variant is terminal: no partial
/// statistics are produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("invalid request range [{start}, {end})")]
    InvalidRange { start: String, end: String },

    #[error("malformed record in {stream}: {source}")]
    MalformedRecord {
        stream: Stream,
        #[source]
        source: IterError,
    },

    #[error("{} key {key} not in request range {span}", .violation.edge())]
    OutOfRange {
        violation: RangeViolation,
        key: String,
        span: KeyRange,
    },

    #[error("computing {pass} stats: {source}")]
    StatsComputation {
        pass: StatsPass,
        #[source]
        source: StatsError,
    },

    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    pub(super) fn from_iter(stream: Stream, err: IterError) -> Self {
        if err.is_cancelled() {
            return IngestError::Cancelled;
        }
        IngestError::MalformedRecord {
            stream,
            source: err,
        }
    }

    /// Iterator failures inside a stats pass surface as the stream failure
    /// that caused them; only accounting errors stay stats errors.
    pub(super) fn from_stats(pass: StatsPass, stream: Stream, err: StatsError) -> Self {
        match err {
            StatsError::Iter(e) => Self::from_iter(stream, e),
            other => IngestError::StatsComputation {
                pass,
                source: other,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }

    pub fn range_violation(&self) -> Option<RangeViolation> {
        match self {
            IngestError::OutOfRange { violation, .. } => Some(*violation),
            _ => None,
        }
    }

    pub fn malformed_stream(&self) -> Option<Stream> {
        match self {
            IngestError::MalformedRecord { stream, .. } => Some(*stream),
            _ => None,
        }
    }
}

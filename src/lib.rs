//! `sstingest` verifies externally built sorted tables before they are linked
//! into a live MVCC key range, and computes the change to the range's
//! statistics the ingestion causes.
//!
//! The crate is built around a few rules:
//! - MVCC keys are ordered by `(key ASC, timestamp DESC)`, inline records first.
//! - Every record of an accepted table lies inside the request span `[start, end)`.
//! - A version present in both the range and the table is counted once, with
//!   the table's value.
//! - Evaluation is all-or-nothing: a rejected table yields no stats delta.
//!
//! [`ingest::eval_add_sstable`] is the entry point; [`replica::Replica`] shows
//! how a caller evaluates, then applies the result.

pub mod cancel;
pub mod command;
pub mod engine;
pub mod ingest;
pub mod integrity;
pub mod iter;
pub mod merge;
pub mod mvcc_key;
pub mod options;
pub mod replica;
pub mod sst;
pub mod stats;
pub mod value;

pub use cancel::CancelToken;
pub use command::{Command, CommandRegistry};
pub use engine::MemEngine;
pub use ingest::{
    eval_add_sstable, AddSstableRequest, AddSstableResult, EvalContext, IngestError, KeyRange,
};
pub use integrity::checksum32;
pub use iter::{MvccIterator, Reader};
pub use mvcc_key::{MvccKey, Timestamp};
pub use options::IngestOptions;
pub use replica::Replica;
pub use stats::MvccStats;

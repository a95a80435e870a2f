//! MVCC statistics.
//!
//! [`MvccStats`] are the aggregate counters a range keeps about its data.
//! [`compute_stats`] derives them from scratch over a key span by walking an
//! [`MvccIterator`]; bulk ingestion uses it twice (before and after merging an
//! incoming table) and applies the difference.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::iter::{IterError, MvccIterator};
use crate::mvcc_key::{is_system_key, pretty_key, MvccKey};

/// Bytes accounted to the timestamp suffix of every versioned key.
pub const MVCC_VERSION_TIMESTAMP_SIZE: i64 = 12;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatsError {
    #[error(transparent)]
    Iter(#[from] IterError),

    #[error("inconsistent data at key {key}: {reason}")]
    Inconsistent { key: String, reason: &'static str },
}

/// Aggregate byte and count statistics over MVCC data.
///
/// `gc_bytes_age` accumulates non-live bytes multiplied by the whole seconds
/// they have been non-live, as of `last_update_nanos`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccStats {
    pub last_update_nanos: i64,
    pub gc_bytes_age: i64,
    pub live_bytes: i64,
    pub live_count: i64,
    pub key_bytes: i64,
    pub key_count: i64,
    pub val_bytes: i64,
    pub val_count: i64,
    pub sys_bytes: i64,
    pub sys_count: i64,
}

impl MvccStats {
    /// Bytes not visible to the newest reads: shadowed versions, tombstones
    /// and the metadata of deleted keys.
    pub fn gc_bytes(&self) -> i64 {
        self.key_bytes + self.val_bytes - self.live_bytes
    }

    pub fn total(&self) -> i64 {
        self.key_bytes + self.val_bytes
    }

    /// Accrues `gc_bytes_age` up to `now_nanos`. Never moves backwards.
    pub fn age_to(&mut self, now_nanos: i64) {
        if self.last_update_nanos >= now_nanos {
            return;
        }
        let diff_seconds = now_nanos / NANOS_PER_SECOND - self.last_update_nanos / NANOS_PER_SECOND;
        self.gc_bytes_age += self.gc_bytes() * diff_seconds;
        self.last_update_nanos = now_nanos;
    }

    /// Adds `other` after aging both sides to the later update time.
    pub fn add(&mut self, other: &MvccStats) {
        let mut other = *other;
        self.age_to(other.last_update_nanos);
        other.age_to(self.last_update_nanos);

        self.gc_bytes_age += other.gc_bytes_age;
        self.live_bytes += other.live_bytes;
        self.live_count += other.live_count;
        self.key_bytes += other.key_bytes;
        self.key_count += other.key_count;
        self.val_bytes += other.val_bytes;
        self.val_count += other.val_count;
        self.sys_bytes += other.sys_bytes;
        self.sys_count += other.sys_count;
    }

    /// Subtracts `other` after aging both sides to the later update time.
    pub fn subtract(&mut self, other: &MvccStats) {
        let mut other = *other;
        self.age_to(other.last_update_nanos);
        other.age_to(self.last_update_nanos);

        self.gc_bytes_age -= other.gc_bytes_age;
        self.live_bytes -= other.live_bytes;
        self.live_count -= other.live_count;
        self.key_bytes -= other.key_bytes;
        self.key_count -= other.key_count;
        self.val_bytes -= other.val_bytes;
        self.val_count -= other.val_count;
        self.sys_bytes -= other.sys_bytes;
        self.sys_count -= other.sys_count;
    }

    /// True when every counter is zero; `last_update_nanos` is ignored.
    pub fn is_zero(&self) -> bool {
        MvccStats {
            last_update_nanos: 0,
            ..*self
        } == MvccStats::default()
    }

    /// Counter-wise equality, ignoring `last_update_nanos`.
    pub fn counters_eq(&self, other: &MvccStats) -> bool {
        MvccStats {
            last_update_nanos: 0,
            ..*self
        } == MvccStats {
            last_update_nanos: 0,
            ..*other
        }
    }
}

#[derive(Debug, Default)]
struct KeyMeta {
    deleted: bool,
    inline: bool,
    wall_time: i64,
}

fn age_seconds(now_nanos: i64, since_nanos: i64) -> i64 {
    now_nanos / NANOS_PER_SECOND - since_nanos / NANOS_PER_SECOND
}

/// Computes statistics for records in `[start, end)` as of `now_nanos`.
///
/// The iterator is positioned with a single seek to `start`, so an empty span
/// costs one seek. Iterator errors and inconsistent version chains abort the
/// computation.
pub fn compute_stats<I: MvccIterator + ?Sized>(
    iter: &mut I,
    start: &[u8],
    end: &[u8],
    now_nanos: i64,
) -> Result<MvccStats, StatsError> {
    let mut ms = MvccStats::default();
    let mut meta = KeyMeta::default();
    let mut prev_key: Option<Vec<u8>> = None;
    let mut first = false;
    let mut accrue_gc_age_nanos = 0i64;

    iter.seek(&MvccKey::seek_key(Bytes::copy_from_slice(start)));
    loop {
        let rec = match iter.current()? {
            None => break,
            Some(rec) => rec,
        };
        let key = rec.key.key;
        if key >= end {
            break;
        }
        let value = rec.value;
        let is_sys = is_system_key(key);
        let is_value = rec.key.is_value();
        let same_key = prev_key.as_deref() == Some(key);
        if is_value && same_key && meta.inline {
            return Err(StatsError::Inconsistent {
                key: pretty_key(key),
                reason: "versions stored under an inline value",
            });
        }
        let implicit_meta = is_value && !same_key;
        if !same_key {
            prev_key = Some(key.to_vec());
        }

        if implicit_meta {
            meta = KeyMeta {
                deleted: value.is_empty(),
                inline: false,
                wall_time: rec.key.timestamp.wall_time,
            };
        } else if !is_value {
            meta = KeyMeta {
                deleted: value.is_empty(),
                inline: true,
                wall_time: 0,
            };
        }

        if !is_value || implicit_meta {
            let meta_key_size = key.len() as i64 + 1;
            let meta_val_size = if implicit_meta { 0 } else { value.len() as i64 };
            let total_bytes = meta_key_size + meta_val_size;
            first = true;

            if is_sys {
                ms.sys_bytes += total_bytes;
                ms.sys_count += 1;
            } else {
                if !meta.deleted {
                    ms.live_bytes += total_bytes;
                    ms.live_count += 1;
                } else {
                    ms.gc_bytes_age += total_bytes * age_seconds(now_nanos, meta.wall_time);
                }
                ms.key_bytes += meta_key_size;
                ms.val_bytes += meta_val_size;
                ms.key_count += 1;
                if meta.inline {
                    ms.val_count += 1;
                }
            }

            if !implicit_meta {
                iter.next();
                continue;
            }
        }

        let total_bytes = value.len() as i64 + MVCC_VERSION_TIMESTAMP_SIZE;
        if is_sys {
            ms.sys_bytes += total_bytes;
        } else {
            let wall_time = rec.key.timestamp.wall_time;
            if first {
                first = false;
                if !meta.deleted {
                    ms.live_bytes += total_bytes;
                } else {
                    ms.gc_bytes_age += total_bytes * age_seconds(now_nanos, meta.wall_time);
                }
                accrue_gc_age_nanos = meta.wall_time;
            } else {
                // Shadowed versions become garbage when the next newer version
                // was written; tombstones are garbage from their own timestamp.
                let since = if value.is_empty() {
                    wall_time
                } else {
                    accrue_gc_age_nanos
                };
                ms.gc_bytes_age += total_bytes * age_seconds(now_nanos, since);
                accrue_gc_age_nanos = wall_time;
            }
            ms.key_bytes += MVCC_VERSION_TIMESTAMP_SIZE;
            ms.val_bytes += value.len() as i64;
            ms.val_count += 1;
        }
        iter.next();
    }

    ms.last_update_nanos = now_nanos;
    Ok(ms)
}

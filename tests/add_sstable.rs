use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use sstingest::cancel::CancelToken;
use sstingest::ingest::{
    eval_add_sstable, AddSstableRequest, EvalContext, IngestError, KeyRange, RangeViolation,
    Stream,
};
use sstingest::iter::{IterError, IterOptions, MvccIterator, Reader, RecordView};
use sstingest::mvcc_key::{MvccKey, Timestamp};
use sstingest::sst::{SstBuilder, SstError, SstIter};
use sstingest::stats::compute_stats;
use sstingest::{checksum32, value, MemEngine, Replica};

const SEC: i64 = 1_000_000_000;
const NOW: i64 = 100 * SEC;

fn ts(secs: i64) -> Timestamp {
    Timestamp::from_wall(secs * SEC)
}

/// Builds a table from `(key, wall seconds, value)`; `None` is a tombstone.
fn table(records: &[(&str, i64, Option<&str>)]) -> Bytes {
    let mut builder = SstBuilder::new(256);
    for (k, secs, v) in records {
        let raw = match v {
            Some(v) => value::encode_bytes(k.as_bytes(), v.as_bytes()),
            None => Bytes::new(),
        };
        builder
            .add(&MvccKey::new(Bytes::copy_from_slice(k.as_bytes()), ts(*secs)), &raw)
            .unwrap();
    }
    builder.finish().unwrap().0
}

fn span(start: &'static str, end: &'static str) -> KeyRange {
    KeyRange::new(start.as_bytes(), end.as_bytes()).unwrap()
}

fn request(span: KeyRange, data: Bytes) -> AddSstableRequest {
    AddSstableRequest {
        span,
        data,
        timestamp: Timestamp::from_wall(NOW),
    }
}

fn table_stats(data: &Bytes, span: &KeyRange) -> sstingest::MvccStats {
    let mut iter = SstIter::open(data.clone(), true).unwrap();
    compute_stats(&mut iter, span.start(), span.end(), NOW).unwrap()
}

#[derive(Debug, Default)]
struct Probe {
    open: AtomicUsize,
    opened: AtomicUsize,
    existing_nexts: AtomicUsize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Existing,
    Incoming,
}

struct Tracked<I> {
    inner: I,
    role: Role,
    probe: Arc<Probe>,
    nexts: usize,
    fail_after: Option<usize>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl<I: MvccIterator> MvccIterator for Tracked<I> {
    fn seek(&mut self, key: &MvccKey) {
        self.inner.seek(key);
    }

    fn next(&mut self) {
        self.nexts += 1;
        if self.role == Role::Existing {
            self.probe.existing_nexts.fetch_add(1, Ordering::SeqCst);
        }
        if let Some((after, token)) = &self.cancel_after {
            if self.nexts >= *after {
                token.cancel();
            }
        }
        self.inner.next();
    }

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError> {
        if matches!(self.fail_after, Some(after) if self.nexts >= after) {
            return Err(IterError::Sst(SstError::Corrupt("injected failure")));
        }
        self.inner.current()
    }
}

impl<I> Drop for Tracked<I> {
    fn drop(&mut self) {
        self.probe.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reader that counts open iterators and can inject failures.
#[derive(Default)]
struct TrackingReader {
    engine: MemEngine,
    probe: Arc<Probe>,
    fail_existing_after: Option<usize>,
    cancel_incoming_after: Option<(usize, CancelToken)>,
}

impl TrackingReader {
    fn track<I>(&self, inner: I, role: Role) -> Tracked<I> {
        self.probe.open.fetch_add(1, Ordering::SeqCst);
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        let (fail_after, cancel_after) = match role {
            Role::Existing => (self.fail_existing_after, None),
            Role::Incoming => (None, self.cancel_incoming_after.clone()),
        };
        Tracked {
            inner,
            role,
            probe: self.probe.clone(),
            nexts: 0,
            fail_after,
            cancel_after,
        }
    }

    fn open(&self) -> usize {
        self.probe.open.load(Ordering::SeqCst)
    }

    fn opened(&self) -> usize {
        self.probe.opened.load(Ordering::SeqCst)
    }
}

impl Reader for TrackingReader {
    fn new_iterator(&self, opts: IterOptions) -> Box<dyn MvccIterator + '_> {
        Box::new(self.track(self.engine.iter(opts), Role::Existing))
    }

    fn new_sst_iterator(
        &self,
        data: Bytes,
        verify: bool,
    ) -> Result<Box<dyn MvccIterator + '_>, IterError> {
        let inner = SstIter::open(data, verify)?;
        Ok(Box::new(self.track(inner, Role::Incoming)))
    }
}

#[test]
fn colliding_version_is_counted_once_as_incoming() {
    let engine = MemEngine::new();
    engine.put(&b"k"[..], ts(5), b"existing-live-value");
    let span = span("a", "z");
    let data = table(&[("k", 5, None)]);

    let res = eval_add_sstable(&EvalContext::new(&engine), &request(span.clone(), data.clone()))
        .unwrap();

    let mut existing_iter = engine.iter(IterOptions::default());
    let mut merged = compute_stats(&mut existing_iter, span.start(), span.end(), NOW).unwrap();
    merged.add(&res.stats_delta);

    // After the merge the range holds exactly the table's tombstone.
    let expected = table_stats(&data, &span);
    assert_eq!(merged, expected);
    assert_eq!(merged.key_count, 1);
    assert_eq!(merged.val_count, 1);
    assert_eq!(merged.live_count, 0);
    assert_eq!(merged.live_bytes, 0);
}

#[test]
fn first_key_before_start_is_rejected() {
    let reader = TrackingReader::default();
    let data = table(&[("a", 1, Some("x")), ("c", 1, Some("y"))]);
    let err = eval_add_sstable(&EvalContext::new(&reader), &request(span("b", "d"), data))
        .unwrap_err();
    assert_eq!(err.range_violation(), Some(RangeViolation::Precedes));
    assert_eq!(
        err.to_string(),
        r#"first key "a" not in request range ["b", "d")"#
    );
    // Rejected before the existing data is opened.
    assert_eq!(reader.opened(), 1);
    assert_eq!(reader.open(), 0);
}

#[test]
fn key_past_end_is_rejected() {
    let engine = MemEngine::new();
    let data = table(&[("b", 1, Some("x")), ("e", 1, Some("y"))]);
    let err = eval_add_sstable(&EvalContext::new(&engine), &request(span("b", "d"), data))
        .unwrap_err();
    assert_eq!(err.range_violation(), Some(RangeViolation::Exceeds));
    assert!(err.to_string().starts_with(r#"last key "e""#), "{err}");
}

#[test]
fn key_exactly_at_end_is_rejected() {
    let engine = MemEngine::new();
    let data = table(&[("b", 1, Some("x")), ("d", 1, Some("y"))]);
    let err = eval_add_sstable(&EvalContext::new(&engine), &request(span("b", "d"), data))
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::OutOfRange {
            violation: RangeViolation::Exceeds,
            ..
        }
    ));
}

#[test]
fn rejected_table_applies_no_stats() {
    let desc = span("a", "z");
    let replica = Replica::new(desc);
    replica.engine().put(&b"c"[..], ts(1), b"v");
    let before = replica.recompute_stats(Timestamp::from_wall(NOW)).unwrap();

    for data in [
        table(&[("a", 1, Some("x")), ("c", 2, Some("y"))]),
        table(&[("c", 2, Some("y")), ("f", 1, Some("z"))]),
    ] {
        let req = request(span("b", "f"), data);
        assert!(replica.add_sstable(req, &CancelToken::new()).is_err());
        assert_eq!(replica.stats(), before);
        assert_eq!(replica.engine().len(), 1);
    }
}

#[test]
fn empty_span_touches_no_existing_records() {
    let reader = TrackingReader::default();
    reader.engine.put(&b"a"[..], ts(1), b"left");
    reader.engine.put(&b"x"[..], ts(1), b"right");
    let span = span("m", "p");
    let data = table(&[("m", 2, Some("1")), ("n", 2, Some("2")), ("o", 2, None)]);

    let res = eval_add_sstable(&EvalContext::new(&reader), &request(span.clone(), data.clone()))
        .unwrap();
    assert_eq!(reader.probe.existing_nexts.load(Ordering::SeqCst), 0);
    assert_eq!(res.stats_delta, table_stats(&data, &span));
}

#[test]
fn reingesting_same_table_is_a_no_op() {
    let replica = Replica::new(span("a", "z"));
    replica.engine().put(&b"c"[..], ts(1), b"older");
    replica.recompute_stats(Timestamp::from_wall(NOW)).unwrap();
    let data = table(&[
        ("b", 3, Some("1")),
        ("c", 3, Some("2")),
        ("c", 1, Some("replaced")),
        ("d", 3, None),
    ]);

    let first = replica
        .add_sstable(request(span("b", "e"), data.clone()), &CancelToken::new())
        .unwrap();
    assert!(!first.stats_delta.is_zero());
    let after_first = replica.stats();

    let second = replica
        .add_sstable(request(span("b", "e"), data), &CancelToken::new())
        .unwrap();
    assert!(second.stats_delta.is_zero(), "{:?}", second.stats_delta);
    assert_eq!(replica.stats(), after_first);
    assert_eq!(
        replica.recompute_stats(Timestamp::from_wall(NOW)).unwrap(),
        after_first
    );
}

#[test]
fn checksum_is_stable_and_covers_bytes() {
    let engine = MemEngine::new();
    let data = table(&[("b", 1, Some("x"))]);
    let ctx = EvalContext::new(&engine);
    let a = eval_add_sstable(&ctx, &request(span("a", "z"), data.clone())).unwrap();
    let b = eval_add_sstable(&ctx, &request(span("a", "z"), data.clone())).unwrap();
    assert_eq!(a.crc32, b.crc32);
    assert_eq!(a.crc32, checksum32(&data));
    assert_eq!(a.data, data);

    let other = table(&[("b", 1, Some("y"))]);
    let c = eval_add_sstable(&ctx, &request(span("a", "z"), other)).unwrap();
    assert_ne!(a.crc32, c.crc32);
}

#[test]
fn corrupt_record_anywhere_rejects_table() {
    let keys = ["b", "c", "d", "e", "f"];
    for bad in 0..keys.len() {
        let mut builder = SstBuilder::new(64);
        for (i, k) in keys.iter().enumerate() {
            let mut raw = value::encode_bytes(k.as_bytes(), b"payload").to_vec();
            if i == bad {
                let last = raw.len() - 1;
                raw[last] ^= 0xff;
            }
            builder
                .add(&MvccKey::new(Bytes::copy_from_slice(k.as_bytes()), ts(1)), &raw)
                .unwrap();
        }
        let data = builder.finish().unwrap().0;

        let reader = TrackingReader::default();
        let err = eval_add_sstable(&EvalContext::new(&reader), &request(span("a", "z"), data))
            .unwrap_err();
        assert_eq!(err.malformed_stream(), Some(Stream::Incoming), "position {bad}: {err}");
        assert_eq!(reader.open(), 0, "position {bad}");
    }
}

#[test]
fn existing_stream_failure_is_attributed() {
    let reader = TrackingReader {
        fail_existing_after: Some(1),
        ..Default::default()
    };
    reader.engine.put(&b"b"[..], ts(1), b"1");
    reader.engine.put(&b"c"[..], ts(1), b"2");

    let data = table(&[("d", 1, Some("x"))]);
    let err = eval_add_sstable(&EvalContext::new(&reader), &request(span("a", "z"), data))
        .unwrap_err();
    assert_eq!(err.malformed_stream(), Some(Stream::Existing), "{err}");
    assert_eq!(reader.open(), 0);
}

#[test]
fn iterators_released_on_success() {
    let reader = TrackingReader::default();
    reader.engine.put(&b"c"[..], ts(1), b"v");
    let data = table(&[("b", 2, Some("x")), ("c", 2, Some("y"))]);
    eval_add_sstable(&EvalContext::new(&reader), &request(span("a", "z"), data)).unwrap();
    assert_eq!(reader.opened(), 2);
    assert_eq!(reader.open(), 0);
}

#[test]
fn cancellation_mid_merge_aborts_and_releases() {
    let token = CancelToken::new();
    let reader = TrackingReader {
        cancel_incoming_after: Some((2, token.clone())),
        ..Default::default()
    };
    let data = table(&[
        ("b", 1, Some("1")),
        ("c", 1, Some("2")),
        ("d", 1, Some("3")),
        ("e", 1, Some("4")),
    ]);
    let ctx = EvalContext::new(&reader).with_cancel(token);
    let err = eval_add_sstable(&ctx, &request(span("a", "z"), data)).unwrap_err();
    assert_eq!(err, IngestError::Cancelled);
    assert_eq!(reader.opened(), 2);
    assert_eq!(reader.open(), 0);
}

#[test]
fn inverted_span_is_rejected_up_front() {
    let err = KeyRange::new(&b"d"[..], &b"b"[..]).unwrap_err();
    assert!(matches!(err, IngestError::InvalidRange { .. }));
    assert_eq!(err.to_string(), r#"invalid request range ["d", "b")"#);
}

#[test]
fn empty_table_is_accepted_with_zero_delta() {
    let engine = MemEngine::new();
    engine.put(&b"c"[..], ts(1), b"v");
    let res = eval_add_sstable(&EvalContext::new(&engine), &request(span("a", "z"), table(&[])))
        .unwrap();
    assert!(res.stats_delta.is_zero());
}

//! Merged view over several record streams.

use std::cmp::Ordering;

use crate::iter::{IterError, MvccIterator, RecordView};
use crate::mvcc_key::MvccKey;

/// Merges sorted iterators into one `MvccKey`-ordered stream.
///
/// When several iterators sit on the same key and timestamp, the one listed
/// last wins and the others are skipped along with it. Ingestion lists the
/// existing range data first and the incoming table last, so a colliding
/// version is reported once, with the table's value.
///
/// The merge borrows its inputs and never copies records. The first error
/// from any input is latched; `current` keeps reporting it.
pub struct MultiIterator<'a> {
    iters: Vec<&'a mut dyn MvccIterator>,
    current: Option<usize>,
    with_current_key: Vec<usize>,
    err: Option<IterError>,
}

impl<'a> MultiIterator<'a> {
    pub fn new(iters: Vec<&'a mut dyn MvccIterator>) -> Self {
        Self {
            iters,
            current: None,
            with_current_key: Vec::new(),
            err: None,
        }
    }

    fn settle(&mut self) {
        self.current = None;
        self.with_current_key.clear();

        for i in 0..self.iters.len() {
            let ord = {
                let rec = match self.iters[i].current() {
                    Ok(Some(rec)) => rec,
                    Ok(None) => continue,
                    Err(e) => {
                        self.err = Some(e);
                        self.current = None;
                        self.with_current_key.clear();
                        return;
                    }
                };
                match self.current {
                    None => Ordering::Less,
                    Some(c) => match self.iters[c].current() {
                        Ok(Some(best)) => rec.key.cmp(&best.key),
                        _ => Ordering::Less,
                    },
                }
            };

            match ord {
                Ordering::Less => {
                    self.current = Some(i);
                    self.with_current_key.clear();
                    self.with_current_key.push(i);
                }
                Ordering::Equal => {
                    self.current = Some(i);
                    self.with_current_key.push(i);
                }
                Ordering::Greater => {}
            }
        }
    }
}

impl MvccIterator for MultiIterator<'_> {
    fn seek(&mut self, key: &MvccKey) {
        if self.err.is_some() {
            return;
        }
        for iter in self.iters.iter_mut() {
            iter.seek(key);
        }
        self.settle();
    }

    fn next(&mut self) {
        if self.err.is_some() || self.current.is_none() {
            return;
        }
        for &i in &self.with_current_key {
            self.iters[i].next();
        }
        self.settle();
    }

    fn current(&self) -> Result<Option<RecordView<'_>>, IterError> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        match self.current {
            None => Ok(None),
            Some(i) => self.iters[i].current(),
        }
    }
}

//! A single range: its descriptor, its data and the running stats kept for
//! it. Commands are evaluated against the engine and their results applied
//! under the stats lock, so concurrent ingestions into one replica are
//! serialized.

use anyhow::Context;
use parking_lot::Mutex;
use tracing::info;

use crate::cancel::CancelToken;
use crate::command::{CommandRegistry, Request, Response};
use crate::engine::MemEngine;
use crate::ingest::{AddSstableRequest, AddSstableResult, EvalContext, KeyRange};
use crate::iter::IterOptions;
use crate::mvcc_key::Timestamp;
use crate::options::IngestOptions;
use crate::stats::{compute_stats, MvccStats};

pub struct Replica {
    desc: KeyRange,
    engine: MemEngine,
    stats: Mutex<MvccStats>,
    registry: CommandRegistry,
    options: IngestOptions,
}

impl Replica {
    pub fn new(desc: KeyRange) -> Self {
        Self::with_registry(desc, CommandRegistry::with_builtin_commands())
    }

    pub fn with_registry(desc: KeyRange, registry: CommandRegistry) -> Self {
        Self {
            desc,
            engine: MemEngine::new(),
            stats: Mutex::new(MvccStats::default()),
            registry,
            options: IngestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn desc(&self) -> &KeyRange {
        &self.desc
    }

    /// Direct engine access. Writes made here bypass the running stats;
    /// follow them with [`Replica::recompute_stats`].
    pub fn engine(&self) -> &MemEngine {
        &self.engine
    }

    pub fn stats(&self) -> MvccStats {
        *self.stats.lock()
    }

    /// Recomputes the range's stats from scratch and replaces the running
    /// stats with the result.
    pub fn recompute_stats(&self, now: Timestamp) -> anyhow::Result<MvccStats> {
        let mut stats = self.stats.lock();
        let mut iter = self.engine.iter(IterOptions {
            upper_bound: Some(self.desc.end().clone()),
        });
        let computed = compute_stats(
            &mut iter,
            self.desc.start(),
            self.desc.end(),
            now.wall_time,
        )
        .with_context(|| format!("recomputing stats for {}", self.desc))?;
        *stats = computed;
        Ok(computed)
    }

    /// Evaluates and applies an AddSSTable request. The stats delta and the
    /// table's records are applied together, and only if evaluation succeeds.
    pub fn add_sstable(
        &self,
        request: AddSstableRequest,
        cancel: &CancelToken,
    ) -> anyhow::Result<AddSstableResult> {
        anyhow::ensure!(
            self.desc.contains(&request.span),
            "request span {} outside range {}",
            request.span,
            self.desc
        );

        let request = Request::AddSstable(request);
        let mut stats = self.stats.lock();
        let mut updated = *stats;
        let ctx = EvalContext::new(&self.engine)
            .with_options(self.options.clone())
            .with_cancel(cancel.clone());
        let Response::AddSstable(result) = self.registry.eval(&ctx, &request, &mut updated)?;

        let applied = self
            .engine
            .ingest_sst(result.data.clone())
            .context("linking verified table into engine")?;
        *stats = updated;
        info!(
            range = %self.desc,
            records = applied,
            key_count_delta = result.stats_delta.key_count,
            crc32 = result.crc32,
            "ingested table"
        );
        Ok(result)
    }
}

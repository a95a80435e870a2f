use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use sstingest::ingest::{eval_add_sstable, AddSstableRequest, EvalContext, KeyRange};
use sstingest::mvcc_key::{pretty_key, MvccKey, Timestamp};
use sstingest::sst::{SstBuilder, SstReader, DEFAULT_BLOCK_SIZE};
use sstingest::{value, IngestOptions, MemEngine, MvccIterator, MvccStats};

#[derive(Debug, Parser)]
#[command(name = "sstingest")]
#[command(about = "Build, inspect and verify tables for AddSSTable ingestion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a table from sorted JSON lines.
    BuildSst {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
    },
    /// Print a table's properties and its first records.
    SstDump {
        #[arg(long)]
        sst: PathBuf,
    },
    /// Evaluate ingesting a table into `[start, end)` and print the result.
    Verify {
        #[arg(long)]
        sst: PathBuf,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Stats are computed as of this wall time, in nanoseconds.
        #[arg(long)]
        wall_time: i64,
        /// Table holding the range's current data.
        #[arg(long)]
        existing: Option<PathBuf>,
        #[arg(long)]
        skip_value_checks: bool,
    },
}

#[derive(Debug, Deserialize)]
struct InputRecord {
    key: String,
    wall_time: i64,
    #[serde(default)]
    logical: i32,
    value: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    checksum: u32,
    stats_delta: MvccStats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::BuildSst {
            input,
            out,
            block_size,
        } => build_sst(
            &input,
            &out,
            &IngestOptions {
                block_size,
                ..Default::default()
            },
        ),
        Command::SstDump { sst } => sst_dump(&sst),
        Command::Verify {
            sst,
            start,
            end,
            wall_time,
            existing,
            skip_value_checks,
        } => verify(
            &sst,
            start,
            end,
            wall_time,
            existing.as_deref(),
            skip_value_checks,
        ),
    }
}

fn read_table(path: &Path) -> anyhow::Result<Bytes> {
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Bytes::from(data))
}

fn build_sst(input: &Path, out: &Path, options: &IngestOptions) -> anyhow::Result<()> {
    let file = std::fs::File::open(input).with_context(|| format!("open {}", input.display()))?;
    let mut builder = SstBuilder::new(options.block_size);
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: InputRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: parse record", input.display(), line_no + 1))?;
        let key = Bytes::from(rec.key.into_bytes());
        let raw = match &rec.value {
            Some(v) => value::encode_bytes(&key, v.as_bytes()),
            None => Bytes::new(),
        };
        let key = MvccKey::new(key, Timestamp::new(rec.wall_time, rec.logical));
        builder
            .add(&key, &raw)
            .with_context(|| format!("{}:{}: add record", input.display(), line_no + 1))?;
    }

    let (data, props) = builder.finish()?;
    std::fs::write(out, &data).with_context(|| format!("write {}", out.display()))?;
    println!(
        "wrote {} ({} entries, {} bytes)",
        out.display(),
        props.entries,
        data.len()
    );
    Ok(())
}

fn sst_dump(sst: &Path) -> anyhow::Result<()> {
    let reader = SstReader::open(read_table(sst)?)?;
    println!("file: {}", sst.display());
    println!("props: {:?}", reader.properties());
    println!("blocks: {}", reader.block_count());

    let mut iter = reader.iter(true);
    iter.seek_to_first();
    let mut shown = 0usize;
    while let Some(rec) = iter.current()? {
        if shown == 16 {
            println!("...");
            break;
        }
        match value::payload(rec.value) {
            Some(payload) => println!(
                "{} @ {} => {} bytes",
                pretty_key(rec.key.key),
                rec.key.timestamp,
                payload.len()
            ),
            None => println!(
                "{} @ {} => <tombstone>",
                pretty_key(rec.key.key),
                rec.key.timestamp
            ),
        }
        shown += 1;
        iter.next();
    }
    Ok(())
}

fn verify(
    sst: &Path,
    start: String,
    end: String,
    wall_time: i64,
    existing: Option<&Path>,
    skip_value_checks: bool,
) -> anyhow::Result<()> {
    let engine = MemEngine::new();
    if let Some(path) = existing {
        let loaded = engine
            .ingest_sst(read_table(path)?)
            .with_context(|| format!("load existing table {}", path.display()))?;
        tracing::debug!(records = loaded, "loaded existing range data");
    }

    let request = AddSstableRequest {
        span: KeyRange::new(start.into_bytes(), end.into_bytes())?,
        data: read_table(sst)?,
        timestamp: Timestamp::from_wall(wall_time),
    };
    let ctx = EvalContext::new(&engine).with_options(IngestOptions {
        verify_values: !skip_value_checks,
        ..Default::default()
    });
    let result = eval_add_sstable(&ctx, &request)
        .with_context(|| format!("verify {}", sst.display()))?;

    let report = VerifyReport {
        checksum: result.crc32,
        stats_delta: result.stats_delta,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

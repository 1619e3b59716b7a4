// src/pipeline.rs
//! Orchestrator: read → drop missing captions → partition → spawn workers → aggregate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use metrics::gauge;
use tokio::process::Command;
use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::config::{FiltrationConfig, StorageConfig, ENV_STORAGE};
use crate::pool::{worker_args, WorkerPool};
use crate::shard::{partition, shard_prefix, Shard, Strategy};
use crate::table::{PostTable, CAPTION_COLUMN};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub out_dir: PathBuf,
    pub proc_num: usize,
    /// Forwarded to every worker as `--config`.
    pub config_path: Option<PathBuf>,
}

/// Source table after cleaning, split and written out for the workers.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub table: PostTable,
    pub shards: Vec<Shard>,
    pub prefix: String,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub rows: usize,
    pub dropped: usize,
    pub shards: usize,
    pub output: PathBuf,
}

/// `<out_dir>/<input stem>_filtered.csv`; the stem ends at the first `.` of the file name.
pub fn output_path(input: &Path, out_dir: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    out_dir.join(format!("{stem}_filtered.csv"))
}

/// Read the input, drop rows without caption, partition and write one table per shard.
pub fn prepare(input: &Path, out_dir: &Path, proc_num: usize) -> Result<PreparedRun> {
    let mut table = PostTable::read(input)?;
    let dropped = table.drop_missing(CAPTION_COLUMN)?;
    let shards = partition(table.len(), proc_num)?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;
    let prefix = shard_prefix(out_dir);
    for shard in &shards {
        table.slice(*shard).write(&shard.table_path(&prefix))?;
    }
    info!(
        rows = table.len(),
        dropped,
        shards = shards.len(),
        "input partitioned"
    );
    Ok(PreparedRun {
        table,
        shards,
        prefix,
        dropped,
    })
}

/// Aggregate worker results and write the final table.
pub fn finish(prepared: &PreparedRun, input: &Path, out_dir: &Path) -> Result<PathBuf> {
    let out = aggregate(&prepared.table, &prepared.shards, out_dir)?;
    let path = output_path(input, out_dir);
    out.write(&path)?;
    info!(rows = out.len(), output = %path.display(), "filtered table written");
    Ok(path)
}

/// Remove shard tables and result arrays. Missing files are ignored.
pub fn remove_intermediate(prepared: &PreparedRun, out_dir: &Path) {
    for shard in &prepared.shards {
        let files = [
            shard.table_path(&prepared.prefix),
            shard.result_path(out_dir, Strategy::ZeroShot),
            shard.result_path(out_dir, Strategy::Topic),
        ];
        for f in files {
            if let Err(e) = std::fs::remove_file(&f) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %f.display(), error = %e, "could not remove intermediate file");
                }
            }
        }
    }
}

/// Full orchestrator run with one child process per shard.
pub async fn run(
    opts: &RunOptions,
    cfg: &FiltrationConfig,
    storage: &StorageConfig,
) -> Result<RunSummary> {
    let prepared = prepare(&opts.input, &opts.out_dir, opts.proc_num)?;
    gauge!("filtration_shards").set(prepared.shards.len() as f64);

    let program = cfg.pipeline.resolve_worker_bin()?;
    info!(worker = %program.display(), "spawning workers");
    let mut pool = WorkerPool::new();
    for shard in &prepared.shards {
        let mut cmd = Command::new(&program);
        cmd.args(worker_args(
            *shard,
            &prepared.prefix,
            &opts.out_dir,
            opts.config_path.as_deref(),
        ))
        .env(ENV_STORAGE, &storage.root);
        pool.spawn(*shard, cmd);
    }
    pool.join_all().await?;

    let output = finish(&prepared, &opts.input, &opts.out_dir)?;
    if !cfg.pipeline.keep_intermediate {
        remove_intermediate(&prepared, &opts.out_dir);
    }

    Ok(RunSummary {
        rows: prepared.table.len(),
        dropped: prepared.dropped,
        shards: prepared.shards.len(),
        output,
    })
}

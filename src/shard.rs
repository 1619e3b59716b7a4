// src/shard.rs
//! Partitioning a table of `N` rows into at most `P` contiguous shards, plus the
//! file-naming conventions shared by the orchestrator, the workers and the aggregator.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Half-open row range `[start, finish)` over the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shard {
    pub start: usize,
    pub finish: usize,
}

impl Shard {
    pub fn new(start: usize, finish: usize) -> Self {
        Self { start, finish }
    }

    /// Number of rows covered by the shard.
    pub fn len(&self) -> usize {
        self.finish.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `<prefix><start>_<finish>.csv`
    pub fn table_path(&self, prefix: &str) -> PathBuf {
        PathBuf::from(format!("{prefix}{}_{}.csv", self.start, self.finish))
    }

    /// `<dir>/<zero|bertopic>_<start>_<finish>.npy`
    pub fn result_path(&self, dir: &Path, strategy: Strategy) -> PathBuf {
        dir.join(format!(
            "{}_{}_{}.npy",
            strategy.file_stem(),
            self.start,
            self.finish
        ))
    }
}

impl std::fmt::Display for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.finish)
    }
}

/// Which classification strategy produced a result array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ZeroShot,
    Topic,
}

impl Strategy {
    /// File/column stem used for this strategy's per-shard array.
    pub fn file_stem(self) -> &'static str {
        match self {
            Strategy::ZeroShot => "zero",
            Strategy::Topic => "bertopic",
        }
    }

    /// Column appended to the final table.
    pub fn column(self) -> &'static str {
        match self {
            Strategy::ZeroShot => "adv_zero",
            Strategy::Topic => "adv_bertopic",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Split `total` rows across `proc_num` workers.
///
/// `shift = ceil(total / proc_num)`; shards are `[0, shift), [shift, 2*shift), ...` with the
/// last end clamped to `total`. On the `proc_num`-th shard the end is forced to `total`, so
/// at most `proc_num` shards are produced. An empty table yields no shards.
pub fn partition(total: usize, proc_num: usize) -> Result<Vec<Shard>, PipelineError> {
    if proc_num == 0 {
        return Err(PipelineError::InvalidWorkerCount);
    }
    let mut shards = Vec::with_capacity(proc_num);
    if total == 0 {
        return Ok(shards);
    }

    let shift = total.div_ceil(proc_num);
    let mut start = 0usize;
    let mut index = 0usize;
    while start != total {
        index += 1;
        let mut finish = start + shift;
        if finish > total || index == proc_num {
            finish = total;
        }
        shards.push(Shard::new(start, finish));
        start = finish;
    }
    Ok(shards)
}

/// Prefix for per-shard table files inside `out_dir` (`<out_dir>/tempdf_`).
pub fn shard_prefix(out_dir: &Path) -> String {
    out_dir.join("tempdf_").to_string_lossy().into_owned()
}

// src/aggregate.rs
//! Stitch per-shard verdict arrays back onto the source table.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::PipelineError;
use crate::npy;
use crate::shard::{Shard, Strategy};
use crate::table::PostTable;

const STRATEGIES: [Strategy; 2] = [Strategy::ZeroShot, Strategy::Topic];

/// Append `adv_zero` and `adv_bertopic` to `table`.
///
/// `shards` must be the partition the workers ran with, in order. Every array is loaded and
/// length-checked before any column is built, so a bad shard never yields partial output.
pub fn aggregate(table: &PostTable, shards: &[Shard], dir: &Path) -> Result<PostTable> {
    let covered: usize = shards.iter().map(Shard::len).sum();
    anyhow::ensure!(
        covered == table.len(),
        "shards cover {covered} rows, table has {}",
        table.len()
    );

    let mut columns: [Vec<String>; 2] = [
        Vec::with_capacity(table.len()),
        Vec::with_capacity(table.len()),
    ];
    for shard in shards {
        for (strategy, column) in STRATEGIES.iter().zip(columns.iter_mut()) {
            let path = shard.result_path(dir, *strategy);
            let values = npy::read_f64(&path)
                .with_context(|| format!("loading {strategy} result for shard {shard}"))?;
            if values.len() != shard.len() {
                return Err(PipelineError::ShardLengthMismatch {
                    strategy: *strategy,
                    shard: *shard,
                    expected: shard.len(),
                    actual: values.len(),
                }
                .into());
            }
            debug!(%shard, %strategy, rows = values.len(), "shard result loaded");
            column.extend(values.into_iter().map(format_value));
        }
    }

    let mut out = table.clone();
    for (strategy, column) in STRATEGIES.iter().zip(columns) {
        out.push_column(strategy.column(), column.as_slice())?;
    }
    Ok(out)
}

/// Integral values print without a fractional part (`1`, not `1.0`).
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

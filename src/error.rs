// src/error.rs
//! Typed failures the pipeline surfaces to its callers.
//!
//! Everything else travels as `anyhow::Error` with context attached at the I/O boundary.

use crate::shard::{Shard, Strategy};

/// One worker that did not finish cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub shard: Shard,
    /// Exit code, signal description or spawn/wait error.
    pub status: String,
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {} ({})", self.shard, self.status)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("worker count must be >= 1")]
    InvalidWorkerCount,

    #[error(
        "{strategy} result for shard {shard} has {actual} rows, expected {expected}"
    )]
    ShardLengthMismatch {
        strategy: Strategy,
        shard: Shard,
        expected: usize,
        actual: usize,
    },

    #[error("{} worker(s) failed: {}", .0.len(), join_failures(.0))]
    WorkersFailed(Vec<WorkerFailure>),

    #[error("table is missing required column `{0}`")]
    MissingColumn(String),

    #[error("row {row} has no usable caption")]
    MalformedCaption { row: usize },

    #[error("row {row}: column `{column}` is not a number: {value:?}")]
    MalformedNumber {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row index {index} out of range (table has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },
}

fn join_failures(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_the_shard() {
        let err = PipelineError::ShardLengthMismatch {
            strategy: Strategy::Topic,
            shard: Shard::new(13, 26),
            expected: 13,
            actual: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("bertopic"));
        assert!(msg.contains("[13, 26)"));
        assert!(msg.contains("expected 13"));
    }

    #[test]
    fn worker_failures_are_listed() {
        let err = PipelineError::WorkersFailed(vec![
            WorkerFailure {
                shard: Shard::new(0, 5),
                status: "exit status: 3".into(),
            },
            WorkerFailure {
                shard: Shard::new(5, 9),
                status: "signal 9".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 worker(s) failed"));
        assert!(msg.contains("[0, 5)"));
        assert!(msg.contains("[5, 9)"));
    }
}

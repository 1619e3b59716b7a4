// src/pool.rs
//! Child-process worker pool.
//!
//! One OS process per shard. `join_all` waits for every child (no early cancellation, no
//! timeout) and then reports all failures at once, so a crashed worker can never slip
//! through to aggregation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::process::{Child, Command};
use tracing::{error, info};

use crate::error::{PipelineError, WorkerFailure};
use crate::shard::Shard;

/// A running worker and the shard it owns.
#[derive(Debug)]
pub struct WorkerHandle {
    pub shard: Shard,
    child: Child,
    started: Instant,
}

impl WorkerHandle {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Arguments every worker receives: `<start> <finish> <prefix> <out_dir> [--config PATH]`.
pub fn worker_args(
    shard: Shard,
    prefix: &str,
    out_dir: &Path,
    config: Option<&Path>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        shard.start.to_string().into(),
        shard.finish.to_string().into(),
        prefix.into(),
        out_dir.as_os_str().to_owned(),
    ];
    if let Some(c) = config {
        args.push("--config".into());
        args.push(c.as_os_str().to_owned());
    }
    args
}

#[derive(Debug, Default)]
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
    spawn_failures: Vec<WorkerFailure>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.handles.len() + self.spawn_failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start `command` for `shard`. A spawn error is recorded and reported by `join_all`
    /// so the remaining shards still get their workers.
    pub fn spawn(&mut self, shard: Shard, mut command: Command) {
        command.kill_on_drop(false);
        match command.spawn() {
            Ok(child) => {
                info!(%shard, pid = ?child.id(), "worker started");
                self.handles.push(WorkerHandle {
                    shard,
                    child,
                    started: Instant::now(),
                });
            }
            Err(e) => {
                error!(%shard, error = %e, "worker failed to start");
                self.spawn_failures.push(WorkerFailure {
                    shard,
                    status: format!("spawn failed: {e}"),
                });
            }
        }
    }

    /// Wait for every worker. Ok only if all of them exited with status 0.
    pub async fn join_all(self) -> Result<Vec<Shard>, PipelineError> {
        let mut failures = self.spawn_failures;
        let mut done = Vec::with_capacity(self.handles.len());

        for mut h in self.handles {
            let waited = h.child.wait().await;
            histogram!("filtration_worker_seconds").record(h.started.elapsed().as_secs_f64());
            match waited {
                Ok(status) if status.success() => {
                    info!(shard = %h.shard, "worker finished");
                    done.push(h.shard);
                }
                Ok(status) => {
                    let status = describe_status(status);
                    error!(shard = %h.shard, %status, "worker failed");
                    failures.push(WorkerFailure {
                        shard: h.shard,
                        status,
                    });
                }
                Err(e) => {
                    error!(shard = %h.shard, error = %e, "waiting for worker failed");
                    failures.push(WorkerFailure {
                        shard: h.shard,
                        status: format!("wait failed: {e}"),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(done)
        } else {
            counter!("filtration_worker_failures_total").increment(failures.len() as u64);
            failures.sort_by_key(|f| f.shard);
            Err(PipelineError::WorkersFailed(failures))
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return format!("killed by signal {sig}");
        }
    }
    status.to_string()
}

/// Default location of the worker binary: next to `exe`.
pub fn sibling_binary(exe: &Path, name: &str) -> Option<PathBuf> {
    exe.parent()
        .map(|d| d.join(format!("{name}{}", std::env::consts::EXE_SUFFIX)))
}

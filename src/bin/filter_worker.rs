//! Shard worker: classifies `<prefix><start>_<finish>.csv` with both strategies and writes
//! `zero_<start>_<finish>.npy` and `bertopic_<start>_<finish>.npy` into `out_dir`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use event_filtration::telemetry::{init_tracing, Metrics};
use event_filtration::{cli, worker, FiltrationConfig, Shard, StorageConfig};

#[derive(Parser, Debug)]
#[command(
    name = "filter_worker",
    version,
    about = "Classify one shard of a post table"
)]
struct WorkerCli {
    /// First row of the shard (inclusive).
    start: usize,
    /// End row of the shard (exclusive).
    finish: usize,
    /// Shard table prefix; the table is `<prefix><start>_<finish>.csv`.
    prefix: String,
    /// Directory for the result arrays.
    out_dir: PathBuf,
    #[arg(long, env = "FILTRATION_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: WorkerCli = cli::parse_or_exit();
    cli::report(run(args).await)
}

async fn run(args: WorkerCli) -> Result<()> {
    anyhow::ensure!(
        args.start < args.finish,
        "empty shard [{}, {})",
        args.start,
        args.finish
    );
    let metrics = Metrics::init();
    let cfg = FiltrationConfig::load(args.config.as_deref())?;
    let storage = StorageConfig::from_env();
    let shard = Shard::new(args.start, args.finish);

    info!(%shard, pid = std::process::id(), "worker started");
    let outcome = worker::run(&cfg, &storage, shard, &args.prefix, &args.out_dir).await?;
    info!(%shard, rows = outcome.rows, "worker done");

    let name = format!("worker_{}_{}", shard.start, shard.finish);
    if let Err(e) = metrics.write_snapshot(&args.out_dir, &name) {
        warn!(error = %e, "metrics snapshot not written");
    }
    Ok(())
}

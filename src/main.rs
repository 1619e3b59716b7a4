//! Event filtration: orchestrator entrypoint.
//! Splits a post table into shards, runs one `filter_worker` process per shard and writes
//! `<out_dir>/<input>_filtered.csv` with `adv_zero` and `adv_bertopic` columns.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use event_filtration::cli;
use event_filtration::pipeline::{self, RunOptions};
use event_filtration::telemetry::{init_tracing, Metrics};
use event_filtration::{FiltrationConfig, StorageConfig};

#[derive(Parser, Debug)]
#[command(
    name = "event-filtration",
    version,
    about = "Filter advertising and noise posts out of a social-media table"
)]
struct Cli {
    /// CSV table with at least a `caption` column.
    input: PathBuf,

    /// Directory for the filtered table and intermediate shard files.
    out_dir: PathBuf,

    /// Number of worker processes.
    proc_num: usize,

    /// Filtration config (TOML); forwarded to every worker.
    #[arg(long, env = "FILTRATION_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Cli = cli::parse_or_exit();
    cli::report(run(args).await)
}

async fn run(args: Cli) -> Result<()> {
    let metrics = Metrics::init();
    let cfg = FiltrationConfig::load(args.config.as_deref())?;
    let storage = StorageConfig::from_env();

    info!(
        input = %args.input.display(),
        out_dir = %args.out_dir.display(),
        proc_num = args.proc_num,
        storage = %storage.root.display(),
        "filtration started"
    );

    let opts = RunOptions {
        input: args.input,
        out_dir: args.out_dir,
        proc_num: args.proc_num,
        config_path: args.config,
    };
    let result = pipeline::run(&opts, &cfg, &storage).await;
    if let Err(e) = metrics.write_snapshot(&opts.out_dir, "orchestrator") {
        warn!(error = %e, "metrics snapshot not written");
    }

    let summary = result?;
    info!(
        rows = summary.rows,
        dropped = summary.dropped,
        shards = summary.shards,
        output = %summary.output.display(),
        "filtration finished"
    );
    Ok(())
}

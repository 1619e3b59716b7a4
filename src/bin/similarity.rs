//! Score whether two rows of a post table describe the same real-world event.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::debug;

use event_filtration::embed::build_embedder;
use event_filtration::telemetry::init_tracing;
use event_filtration::table::CAPTION_COLUMN;
use event_filtration::{cli, FiltrationConfig, PostTable, SimilarityScorer, StorageConfig};

#[derive(Parser, Debug)]
#[command(
    name = "similarity",
    version,
    about = "Print time, space, semantic and hashtag similarity of two posts"
)]
struct SimilarityCli {
    /// CSV table with `caption`, `timestamp`, `lat` and `lon` columns.
    table: PathBuf,
    /// Row index of the first post, counting only rows that have a caption.
    index1: usize,
    /// Row index of the second post, counting only rows that have a caption.
    index2: usize,
    #[arg(long, env = "FILTRATION_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: SimilarityCli = cli::parse_or_exit();
    cli::report(run(args).await)
}

async fn run(args: SimilarityCli) -> Result<()> {
    let cfg = FiltrationConfig::load(args.config.as_deref())?;
    let storage = StorageConfig::from_env();
    let mut table = PostTable::read(&args.table)?;
    // same numbering as the filtered output
    let dropped = table.drop_missing(CAPTION_COLUMN)?;
    debug!(dropped, rows = table.len(), "dropped rows without a caption");
    let p1 = table
        .post(args.index1)
        .with_context(|| format!("row {}", args.index1))?;
    let p2 = table
        .post(args.index2)
        .with_context(|| format!("row {}", args.index2))?;

    let embedder = build_embedder(&cfg.embedder, &storage)?;
    let scorer = SimilarityScorer::new(embedder, &cfg.similarity).await?;
    let a = scorer.annotate(p1).await?;
    let b = scorer.annotate(p2).await?;
    let verdict = scorer.score(&a, &b).await?;

    for p in [&a, &b] {
        println!(
            "post {}: {} @ {} ({:.5}, {:.5})",
            p.post.index,
            p.topic,
            format_timestamp(p.post.timestamp),
            p.post.lat,
            p.post.lon
        );
    }
    println!("{verdict}");
    Ok(())
}

fn format_timestamp(secs: f64) -> String {
    DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("{secs}"))
}

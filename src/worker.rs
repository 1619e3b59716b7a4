// src/worker.rs
//! One shard, both strategies.
//!
//! A worker reads `<prefix><start>_<finish>.csv`, runs the zero-shot noise filter and the
//! topic/advertising filter over its captions and writes one `int64` verdict per row to
//! `zero_<start>_<finish>.npy` and `bertopic_<start>_<finish>.npy` in the output directory.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use metrics::counter;
use tracing::{info, instrument};

use crate::config::{FiltrationConfig, StorageConfig};
use crate::embed::{build_embedder, DynEmbedder};
use crate::error::PipelineError;
use crate::npy;
use crate::shard::{Shard, Strategy};
use crate::table::PostTable;
use crate::topics::{
    CentroidTopicModel, TopicInfluenceTable, TopicModel, TopicPredictor, ValidationSet,
};
use crate::zero_shot::{clean_dataset, CandidateLabelClassifier, NoiseRule};

/// Everything a worker needs, built once before touching its shard.
pub struct ShardModels {
    classifier: CandidateLabelClassifier,
    rule: NoiseRule,
    predictor: TopicPredictor,
    influence: TopicInfluenceTable,
    advertising_labels: Vec<String>,
}

impl ShardModels {
    /// Embed the zero-shot labels, then map topics to dominant labels using the validation
    /// set.
    pub async fn build(
        embedder: DynEmbedder,
        topic_model: Box<dyn TopicModel>,
        validation: &ValidationSet,
        cfg: &FiltrationConfig,
    ) -> Result<Self> {
        let labels = cfg.zero_shot.label_set()?;
        let classifier = CandidateLabelClassifier::new(embedder.clone(), labels).await?;
        let predictor = TopicPredictor::new(embedder, topic_model);

        let topics = predictor
            .predict(&validation.captions)
            .await
            .context("assigning topics to the validation set")?;
        let influence = TopicInfluenceTable::build(&topics, &validation.labels, &validation.counts)?;
        info!(
            validation_rows = validation.len(),
            topics = influence.len(),
            "topic influence table ready"
        );

        Ok(Self {
            classifier,
            rule: cfg.zero_shot.rule(),
            predictor,
            influence,
            advertising_labels: cfg.topics.advertising_labels.clone(),
        })
    }

    /// Load the embedder, the topic model artifact and the validation table from storage.
    pub async fn load(cfg: &FiltrationConfig, storage: &StorageConfig) -> Result<Self> {
        let embedder = build_embedder(&cfg.embedder, storage)?;
        let model = CentroidTopicModel::load(&storage.resolve(&cfg.storage.topic_model))?;
        let validation = ValidationSet::load(
            &storage.resolve(&cfg.storage.validation_table),
            &cfg.topics.trash_label,
        )?;
        Self::build(embedder, Box::new(model), &validation, cfg).await
    }
}

/// Per-shard counts, mostly for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardOutcome {
    pub rows: usize,
    pub zero_shot_filtered: usize,
    pub topic_filtered: usize,
    pub degenerate: usize,
}

/// Classify the shard table and write both result arrays into `out_dir`.
#[instrument(skip_all, fields(shard = %shard))]
pub async fn run_shard(
    models: &ShardModels,
    shard: Shard,
    prefix: &str,
    out_dir: &Path,
) -> Result<ShardOutcome> {
    let started = Instant::now();
    let table_path = shard.table_path(prefix);
    let table = PostTable::read(&table_path)?;
    if table.len() != shard.len() {
        anyhow::bail!(
            "{} has {} rows, shard {} expects {}",
            table_path.display(),
            table.len(),
            shard,
            shard.len()
        );
    }
    let captions = table
        .captions()
        .map_err(|e| offset_row(e, shard))
        .with_context(|| format!("reading captions of {}", table_path.display()))?;

    let report = clean_dataset(&models.classifier, &models.rule, &captions).await?;

    let topics = models.predictor.predict(&captions).await?;
    let topic_verdicts: Vec<u8> = topics
        .iter()
        .map(|t| models.influence.is_advertising(*t, &models.advertising_labels))
        .collect();
    let topic_filtered = topic_verdicts.iter().filter(|v| **v == 1).count();

    write_verdicts(&shard.result_path(out_dir, Strategy::ZeroShot), &report.verdicts)?;
    write_verdicts(&shard.result_path(out_dir, Strategy::Topic), &topic_verdicts)?;

    counter!("filtration_rows_total").increment(captions.len() as u64);
    counter!("filtration_topic_filtered_total").increment(topic_filtered as u64);

    let outcome = ShardOutcome {
        rows: captions.len(),
        zero_shot_filtered: report.filtered,
        topic_filtered,
        degenerate: report.degenerate,
    };
    info!(
        rows = outcome.rows,
        zero_shot_filtered = outcome.zero_shot_filtered,
        topic_filtered = outcome.topic_filtered,
        degenerate = outcome.degenerate,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "shard classified"
    );
    Ok(outcome)
}

/// Worker entry point: build models from config and storage, then run the shard.
pub async fn run(
    cfg: &FiltrationConfig,
    storage: &StorageConfig,
    shard: Shard,
    prefix: &str,
    out_dir: &Path,
) -> Result<ShardOutcome> {
    let models = ShardModels::load(cfg, storage).await?;
    run_shard(&models, shard, prefix, out_dir).await
}

/// Shard-local row numbers become source-table row numbers in errors.
fn offset_row(e: PipelineError, shard: Shard) -> PipelineError {
    match e {
        PipelineError::MalformedCaption { row } => PipelineError::MalformedCaption {
            row: shard.start + row,
        },
        other => other,
    }
}

fn write_verdicts(path: &Path, verdicts: &[u8]) -> Result<()> {
    let values: Vec<i64> = verdicts.iter().map(|v| i64::from(*v)).collect();
    npy::write_i64(path, &values)?;
    Ok(())
}

// src/zero_shot.rs
//! Zero-shot candidate-label classification by embedding similarity.
//!
//! Each label is scored as `1 - cosine_distance(text, label)`, the scores are divided by their
//! sum (ratio normalization, not softmax) and labels are ranked by the resulting
//! pseudo-probability. Equal scores keep the label-set order.
//!
//! `NoiseRule` turns the top-ranked label into a keep/filter verdict for the pipeline.

use std::cmp::Ordering;

use anyhow::Result;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::embed::{cosine_similarity, DynEmbedder};
use crate::taxonomy::{CandidateLabelSet, LabelSetError, FILTRATION_LABELS, NOISE_INDICES};
use crate::telemetry::anon_hash;

/// Verdict value for "filter this row out".
pub const FILTER_OUT: u8 = 1;
/// Verdict value for "keep this row".
pub const KEEP: u8 = 0;

#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    /// The similarity vector cannot be normalized (zero-norm embedding, non-finite scores or a
    /// non-positive score sum).
    #[error("degenerate similarity: {0}")]
    DegenerateSimilarity(&'static str),
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
}

/// Labels ranked by pseudo-probability, highest first.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRanking {
    pub sequence: String,
    pub labels: Vec<String>,
    pub scores: Vec<f64>,
    /// Position of each ranked label in the original label set.
    pub label_indices: Vec<usize>,
}

impl LabelRanking {
    pub fn top_label(&self) -> &str {
        &self.labels[0]
    }

    pub fn top_score(&self) -> f64 {
        self.scores[0]
    }

    pub fn top_index(&self) -> usize {
        self.label_indices[0]
    }

    pub fn score_of(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.scores[i])
    }
}

pub struct CandidateLabelClassifier {
    embedder: DynEmbedder,
    labels: CandidateLabelSet,
    label_embeddings: Vec<Vec<f32>>,
}

impl CandidateLabelClassifier {
    /// Embeds the label set once; every later call reuses those vectors.
    pub async fn new(embedder: DynEmbedder, labels: CandidateLabelSet) -> Result<Self> {
        let label_embeddings = embedder.embed(labels.labels()).await?;
        anyhow::ensure!(
            label_embeddings.len() == labels.len(),
            "{} returned {} vectors for {} labels",
            embedder.name(),
            label_embeddings.len(),
            labels.len()
        );
        Ok(Self {
            embedder,
            labels,
            label_embeddings,
        })
    }

    pub fn labels(&self) -> &CandidateLabelSet {
        &self.labels
    }

    pub async fn classify(&self, text: &str) -> Result<LabelRanking, ClassifyError> {
        let emb = crate::embed::embed_one(self.embedder.as_ref(), text)
            .await
            .map_err(ClassifyError::Embedding)?;
        self.rank(text, &emb)
    }

    /// Classify many texts with one embedder call. An embedder failure fails the whole batch;
    /// degenerate rows come back as per-row errors.
    pub async fn classify_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Result<LabelRanking, ClassifyError>>> {
        let embeddings = self.embedder.embed(texts).await?;
        anyhow::ensure!(
            embeddings.len() == texts.len(),
            "{} returned {} vectors for {} texts",
            self.embedder.name(),
            embeddings.len(),
            texts.len()
        );
        Ok(texts
            .iter()
            .zip(&embeddings)
            .map(|(t, e)| self.rank(t, e))
            .collect())
    }

    /// Rank labels for an already-embedded text.
    pub fn rank(&self, text: &str, embedding: &[f32]) -> Result<LabelRanking, ClassifyError> {
        rank_labels(text, self.labels.labels(), &self.label_embeddings, embedding)
    }
}

/// Score, normalize and sort. Pure, so it can be checked without an embedder.
pub fn rank_labels(
    text: &str,
    labels: &[String],
    label_embeddings: &[Vec<f32>],
    text_embedding: &[f32],
) -> Result<LabelRanking, ClassifyError> {
    if labels.len() != label_embeddings.len() {
        return Err(ClassifyError::DegenerateSimilarity(
            "label count differs from label embedding count",
        ));
    }
    if text_embedding.iter().all(|x| *x == 0.0) {
        return Err(ClassifyError::DegenerateSimilarity("zero-norm text embedding"));
    }
    let raw: Vec<f64> = label_embeddings
        .iter()
        .map(|l| cosine_similarity(text_embedding, l))
        .collect::<Option<_>>()
        .ok_or(ClassifyError::DegenerateSimilarity("undefined cosine similarity"))?;

    let sum: f64 = raw.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(ClassifyError::DegenerateSimilarity("non-positive score sum"));
    }
    let probs: Vec<f64> = raw.iter().map(|s| s / sum).collect();

    let mut order: Vec<usize> = (0..labels.len()).collect();
    // stable: ties keep label-set order
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(Ordering::Equal));

    Ok(LabelRanking {
        sequence: text.to_string(),
        labels: order.iter().map(|&i| labels[i].clone()).collect(),
        scores: order.iter().map(|&i| probs[i]).collect(),
        label_indices: order,
    })
}

/// What to do with rows the classifier is not confident about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidencePolicy {
    /// Treat as "not a genuine event".
    #[default]
    FilterOut,
    Keep,
}

impl LowConfidencePolicy {
    pub fn verdict(self) -> u8 {
        match self {
            LowConfidencePolicy::FilterOut => FILTER_OUT,
            LowConfidencePolicy::Keep => KEEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseRule {
    pub threshold: f64,
    pub noise_indices: Vec<usize>,
    pub low_confidence: LowConfidencePolicy,
}

impl NoiseRule {
    pub fn verdict(&self, ranking: &LabelRanking) -> u8 {
        if ranking.top_score() > self.threshold {
            if self.noise_indices.contains(&ranking.top_index()) {
                FILTER_OUT
            } else {
                KEEP
            }
        } else {
            self.low_confidence.verdict()
        }
    }
}

/// Per-shard outcome of the zero-shot strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanReport {
    pub verdicts: Vec<u8>,
    pub filtered: usize,
    pub low_confidence: usize,
    pub degenerate: usize,
}

/// Classify every caption and apply `rule`. One verdict per caption, in order.
pub async fn clean_dataset(
    classifier: &CandidateLabelClassifier,
    rule: &NoiseRule,
    captions: &[String],
) -> Result<CleanReport> {
    let mut report = CleanReport {
        verdicts: Vec::with_capacity(captions.len()),
        ..CleanReport::default()
    };
    let rankings = classifier.classify_batch(captions).await?;
    for (row, (caption, ranking)) in captions.iter().zip(rankings).enumerate() {
        let verdict = match ranking {
            Ok(r) => {
                if r.top_score() <= rule.threshold {
                    report.low_confidence += 1;
                }
                debug!(row, id = %anon_hash(caption), top = r.top_label(), score = r.top_score(), "zero-shot");
                rule.verdict(&r)
            }
            Err(e) => {
                report.degenerate += 1;
                warn!(row, id = %anon_hash(caption), error = %e, "zero-shot fell back to low-confidence policy");
                rule.low_confidence.verdict()
            }
        };
        if verdict == FILTER_OUT {
            report.filtered += 1;
        }
        report.verdicts.push(verdict);
    }

    counter!("filtration_zero_shot_filtered_total").increment(report.filtered as u64);
    counter!("filtration_degenerate_total").increment(report.degenerate as u64);
    Ok(report)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZeroShotConfig {
    pub labels: Vec<String>,
    pub noise_indices: Vec<usize>,
    pub threshold: f64,
    pub low_confidence: LowConfidencePolicy,
}

impl Default for ZeroShotConfig {
    fn default() -> Self {
        Self {
            labels: FILTRATION_LABELS.iter().map(|s| s.to_string()).collect(),
            noise_indices: NOISE_INDICES.to_vec(),
            threshold: 0.0,
            low_confidence: LowConfidencePolicy::FilterOut,
        }
    }
}

impl ZeroShotConfig {
    pub fn label_set(&self) -> Result<CandidateLabelSet, LabelSetError> {
        let set = CandidateLabelSet::new(self.labels.iter().cloned())?;
        set.check_indices(&self.noise_indices)?;
        Ok(set)
    }

    pub fn rule(&self) -> NoiseRule {
        NoiseRule {
            threshold: self.threshold,
            noise_indices: self.noise_indices.clone(),
            low_confidence: self.low_confidence,
        }
    }
}

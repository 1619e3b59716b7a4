// src/topics/mod.rs
//! Topic assignment and topic → ground-truth label dominance.

pub mod dominance;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::embed::{cosine_similarity, DynEmbedder};
use crate::taxonomy::ADVERTISING_LABELS;

pub use dominance::{TopicInfluenceTable, ValidationSet};

pub type TopicId = i64;

/// Topic id for "no topic could be determined".
pub const OUTLIER_TOPIC: TopicId = -1;

/// Assigns a discrete topic to each embedded text.
pub trait TopicModel: Send + Sync {
    fn assign(&self, embeddings: &[Vec<f32>]) -> Result<Vec<TopicId>>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicCentroid {
    pub id: TopicId,
    pub centroid: Vec<f32>,
}

/// Nearest-centroid topic model loaded from a JSON artifact:
///
/// ```json
/// { "outlier_threshold": 0.1, "topics": [ { "id": 0, "centroid": [0.1, 0.2] } ] }
/// ```
#[derive(Debug, Clone)]
pub struct CentroidTopicModel {
    topics: Vec<TopicCentroid>,
    outlier_threshold: f64,
    dimensions: usize,
}

#[derive(Deserialize)]
struct Artifact {
    #[serde(default)]
    outlier_threshold: f64,
    topics: Vec<TopicCentroid>,
}

impl CentroidTopicModel {
    pub fn new(topics: Vec<TopicCentroid>, outlier_threshold: f64) -> Result<Self> {
        anyhow::ensure!(!topics.is_empty(), "topic model has no topics");
        let dimensions = topics[0].centroid.len();
        anyhow::ensure!(dimensions > 0, "topic centroids are empty");
        let mut ids = std::collections::HashSet::new();
        for t in &topics {
            anyhow::ensure!(t.id != OUTLIER_TOPIC, "topic id {} is reserved", OUTLIER_TOPIC);
            anyhow::ensure!(ids.insert(t.id), "duplicate topic id {}", t.id);
            anyhow::ensure!(
                t.centroid.len() == dimensions,
                "topic {} has {} dimensions, expected {}",
                t.id,
                t.centroid.len(),
                dimensions
            );
        }
        Ok(Self {
            topics,
            outlier_threshold,
            dimensions,
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let a: Artifact = serde_json::from_str(s).context("parsing topic model artifact")?;
        Self::new(a.topics, a.outlier_threshold)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading topic model {}", path.display()))?;
        Self::from_json_str(&s).with_context(|| format!("loading topic model {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    fn assign_one(&self, embedding: &[f32]) -> Result<TopicId> {
        anyhow::ensure!(
            embedding.len() == self.dimensions,
            "embedding has {} dimensions, topic model expects {}",
            embedding.len(),
            self.dimensions
        );
        let mut best: Option<(TopicId, f64)> = None;
        for t in &self.topics {
            let Some(sim) = cosine_similarity(embedding, &t.centroid) else {
                continue;
            };
            match best {
                Some((_, b)) if sim <= b => {}
                _ => best = Some((t.id, sim)),
            }
        }
        Ok(match best {
            Some((id, sim)) if sim >= self.outlier_threshold => id,
            _ => OUTLIER_TOPIC,
        })
    }
}

impl TopicModel for CentroidTopicModel {
    fn assign(&self, embeddings: &[Vec<f32>]) -> Result<Vec<TopicId>> {
        embeddings.iter().map(|e| self.assign_one(e)).collect()
    }

    fn name(&self) -> &'static str {
        "centroid"
    }
}

/// Embedder + topic model, both owned by one worker.
pub struct TopicPredictor {
    embedder: DynEmbedder,
    model: Box<dyn TopicModel>,
}

impl TopicPredictor {
    pub fn new(embedder: DynEmbedder, model: Box<dyn TopicModel>) -> Self {
        Self { embedder, model }
    }

    pub async fn predict(&self, texts: &[String]) -> Result<Vec<TopicId>> {
        let embeddings = self.embedder.embed(texts).await?;
        anyhow::ensure!(
            embeddings.len() == texts.len(),
            "{} returned {} vectors for {} texts",
            self.embedder.name(),
            embeddings.len(),
            texts.len()
        );
        let topics = self.model.assign(&embeddings)?;
        anyhow::ensure!(
            topics.len() == texts.len(),
            "{} returned {} topics for {} texts",
            self.model.name(),
            topics.len(),
            texts.len()
        );
        Ok(topics)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Validation labels that mark a topic as advertising.
    pub advertising_labels: Vec<String>,
    /// Validation rows carrying this label are discarded.
    pub trash_label: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            advertising_labels: ADVERTISING_LABELS.iter().map(|s| s.to_string()).collect(),
            trash_label: "trash".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use std::sync::Arc;

    fn model() -> CentroidTopicModel {
        CentroidTopicModel::from_json_str(
            r#"{"outlier_threshold": 0.5,
                "topics": [{"id": 0, "centroid": [1.0, 0.0]}, {"id": 7, "centroid": [0.0, 1.0]}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn nearest_centroid_wins() {
        let m = model();
        let got = m
            .assign(&[vec![0.9, 0.1], vec![0.2, 0.8], vec![0.7, 0.7], vec![-1.0, -1.0]])
            .unwrap();
        // [0.7,0.7] ties at ~0.707 -> first topic; negative vector -> outlier
        assert_eq!(got, vec![0, 7, 0, OUTLIER_TOPIC]);
    }

    #[test]
    fn zero_vector_is_outlier_and_dimension_mismatch_errors() {
        let m = model();
        assert_eq!(m.assign(&[vec![0.0, 0.0]]).unwrap(), vec![OUTLIER_TOPIC]);
        assert!(m.assign(&[vec![1.0, 0.0, 0.0]]).is_err());
    }

    #[test]
    fn artifact_validation() {
        assert!(CentroidTopicModel::from_json_str(r#"{"topics": []}"#).is_err());
        assert!(CentroidTopicModel::from_json_str(
            r#"{"topics": [{"id": -1, "centroid": [1.0]}]}"#
        )
        .is_err());
        assert!(CentroidTopicModel::from_json_str(
            r#"{"topics": [{"id": 1, "centroid": [1.0]}, {"id": 1, "centroid": [0.5]}]}"#
        )
        .is_err());
        assert!(CentroidTopicModel::from_json_str(
            r#"{"topics": [{"id": 1, "centroid": [1.0]}, {"id": 2, "centroid": [0.5, 1.0]}]}"#
        )
        .is_err());
    }

    #[tokio::test]
    async fn predictor_embeds_then_assigns() {
        let embedder = Arc::new(HashingEmbedder::new(64).unwrap());
        let food = embedder.embed_text("pizza pasta");
        let music = embedder.embed_text("concert music");
        let model = CentroidTopicModel::new(
            vec![
                TopicCentroid { id: 3, centroid: food },
                TopicCentroid { id: 4, centroid: music },
            ],
            0.0,
        )
        .unwrap();
        let p = TopicPredictor::new(embedder, Box::new(model));
        let topics = p
            .predict(&["pizza pasta".to_string(), "concert music".to_string()])
            .await
            .unwrap();
        assert_eq!(topics, vec![3, 4]);
    }
}

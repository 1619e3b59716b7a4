// src/embed/mod.rs
//! Text embedding backends and vector helpers.
//!
//! Every classifier receives its embedder explicitly (`DynEmbedder`); nothing here holds a
//! process-global model. Production runs use the local ONNX sentence model; the hashing
//! backend is an offline stand-in for tests and smoke runs.

pub mod hashing;
pub mod http;
pub mod onnx;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::StorageConfig;

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;
pub use onnx::OnnxEmbedder;

pub const DEFAULT_MODEL: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";
/// Storage-relative directory of the exported default model.
pub const DEFAULT_MODEL_DIR: &str = "models/paraphrase-multilingual-MiniLM-L12-v2";

/// Maps texts into a shared vector space.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch; output order matches input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

pub type DynEmbedder = Arc<dyn Embedder>;

/// Embed a single text.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut out = embedder.embed(&[text.to_string()]).await?;
    anyhow::ensure!(
        out.len() == 1,
        "{} returned {} vectors for one text",
        embedder.name(),
        out.len()
    );
    Ok(out.remove(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Local sentence transformer (`model.onnx` + `tokenizer.json`).
    Onnx,
    /// OpenAI-compatible `/embeddings` endpoint serving a sentence transformer.
    Http,
    /// Feature hashing. No semantics beyond shared words; tests and offline smoke runs only.
    Hashing,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    /// Directory with the ONNX export, relative to `$STORAGE` unless absolute.
    pub model_dir: PathBuf,
    /// Tokenizer truncation length for the ONNX backend.
    pub max_tokens: usize,
    /// Output size of the hashing embedder.
    pub dimensions: usize,
    /// OpenAI-compatible `/embeddings` URL for the http backend.
    pub endpoint: String,
    pub model: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::Onnx,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            max_tokens: 128,
            dimensions: 384,
            endpoint: "http://127.0.0.1:8080/v1/embeddings".to_string(),
            model: DEFAULT_MODEL.to_string(),
            batch_size: 64,
            timeout_secs: 30,
        }
    }
}

/// Construct the configured backend. Called once per process.
pub fn build_embedder(cfg: &EmbedderConfig, storage: &StorageConfig) -> Result<DynEmbedder> {
    let embedder: DynEmbedder = match cfg.kind {
        EmbedderKind::Onnx => Arc::new(OnnxEmbedder::load(
            &storage.resolve(&cfg.model_dir),
            cfg.max_tokens,
            cfg.batch_size,
        )?),
        EmbedderKind::Http => Arc::new(HttpEmbedder::from_config(cfg)?),
        EmbedderKind::Hashing => {
            warn!("hashing embedder selected; classifications carry no sentence semantics");
            Arc::new(HashingEmbedder::new(cfg.dimensions)?)
        }
    };
    info!(backend = embedder.name(), "embedder ready");
    Ok(embedder)
}

/// Cosine similarity (`1 - cosine_distance`). `None` for mismatched dimensions or a
/// zero-norm vector, where the value is undefined.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    let sim = dot / (na.sqrt() * nb.sqrt());
    sim.is_finite().then_some(sim)
}

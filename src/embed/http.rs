// src/embed/http.rs
//! Remote sentence embeddings over an OpenAI-compatible `/embeddings` endpoint
//! (text-embeddings-inference, infinity, vLLM and friends all speak it).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Embedder, EmbedderConfig};

pub const ENV_EMBEDDING_API_KEY: &str = "EMBEDDING_API_KEY";

pub struct HttpEmbedder {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    batch_size: usize,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
pub(crate) struct Resp {
    data: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn from_config(cfg: &EmbedderConfig) -> Result<Self> {
        anyhow::ensure!(!cfg.endpoint.trim().is_empty(), "embedder endpoint is empty");
        let http = reqwest::Client::builder()
            .user_agent("event-filtration/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("building embedding http client")?;
        let api_key = std::env::var(ENV_EMBEDDING_API_KEY)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key,
            batch_size: cfg.batch_size.max(1),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut req = self.http.post(&self.endpoint).json(&Req {
            model: &self.model,
            input: batch,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("embedding endpoint {} returned an error", self.endpoint))?;
        let body: Resp = resp.json().await.context("decoding embedding response")?;
        order_by_index(body, batch.len())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Servers may return items out of order; restore input order using `index`.
pub(crate) fn order_by_index(body: Resp, expected: usize) -> Result<Vec<Vec<f32>>> {
    anyhow::ensure!(
        body.data.len() == expected,
        "embedding endpoint returned {} vectors for {} inputs",
        body.data.len(),
        expected
    );
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (pos, item) in body.data.into_iter().enumerate() {
        let idx = item.index.unwrap_or(pos);
        anyhow::ensure!(idx < expected, "embedding index {idx} out of range");
        anyhow::ensure!(slots[idx].is_none(), "duplicate embedding index {idx}");
        slots[idx] = Some(item.embedding);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| anyhow::anyhow!("missing embedding for input {i}")))
        .collect()
}

// src/embed/onnx.rs
//! Local sentence-transformer inference through ONNX Runtime.
//!
//! The model directory holds an exported `model.onnx` and its `tokenizer.json`
//! (`paraphrase-multilingual-MiniLM-L12-v2` by default). Token states are mean-pooled over
//! the attention mask, which is how the model was trained to produce sentence vectors.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use super::Embedder;

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub struct OnnxEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    /// BERT exports take `token_type_ids`; XLM-R style exports do not.
    token_types: bool,
    pad_id: i64,
    batch_size: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`. Inputs longer than
    /// `max_tokens` are truncated by the tokenizer.
    pub fn load(model_dir: &Path, max_tokens: usize, batch_size: usize) -> Result<Self> {
        anyhow::ensure!(max_tokens > 0, "onnx embedder needs max_tokens >= 1");
        let model_path = model_dir.join(MODEL_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        anyhow::ensure!(
            model_path.is_file(),
            "sentence embedding model not found: {}",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.is_file(),
            "sentence embedding tokenizer not found: {}",
            tokenizer_path.display()
        );

        let session = Session::builder()
            .context("creating onnx session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("loading embedding model {}", model_path.display()))?;
        let token_types = session.inputs.iter().any(|i| i.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("loading tokenizer {}: {e}", tokenizer_path.display()))?;
        let pad_id = tokenizer.get_padding().map_or(0, |p| p.pad_id as i64);
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("configuring tokenizer truncation: {e}"))?;

        info!(
            model = %model_dir.display(),
            token_types,
            max_tokens,
            "sentence embedding model loaded"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            token_types,
            pad_id,
            batch_size: batch_size.max(1),
        })
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let session = Arc::clone(&self.session);
            let tokenizer = Arc::clone(&self.tokenizer);
            let chunk = chunk.to_vec();
            let (token_types, pad_id) = (self.token_types, self.pad_id);
            let vectors = tokio::task::spawn_blocking(move || {
                embed_sync(&session, &tokenizer, &chunk, token_types, pad_id)
            })
            .await
            .context("onnx embedding task panicked")??;
            out.extend(vectors);
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

fn embed_sync(
    session: &Mutex<Session>,
    tokenizer: &Tokenizer,
    texts: &[String],
    token_types: bool,
    pad_id: i64,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let encodings = texts
        .iter()
        .map(|t| {
            tokenizer
                .encode(t.as_str(), true)
                .map_err(|e| anyhow!("tokenization failed: {e}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let batch = encodings.len();
    let seq = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0);
    anyhow::ensure!(seq > 0, "tokenizer produced no tokens");

    let mut ids: Vec<i64> = Vec::with_capacity(batch * seq);
    let mut mask: Vec<i64> = Vec::with_capacity(batch * seq);
    for enc in &encodings {
        let n = enc.get_ids().len();
        ids.extend(enc.get_ids().iter().map(|&id| id as i64));
        mask.extend(enc.get_attention_mask().iter().map(|&m| m as i64));
        ids.resize(ids.len() + seq - n, pad_id);
        mask.resize(mask.len() + seq - n, 0);
    }

    let shape = [batch as i64, seq as i64];
    let ids_tensor = Tensor::from_array((shape, ids)).context("building input_ids tensor")?;
    let mask_tensor =
        Tensor::from_array((shape, mask.clone())).context("building attention_mask tensor")?;

    let hidden = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow!("onnx session lock poisoned: {e}"))?;
        let run = if token_types {
            let types_tensor = Tensor::from_array((shape, vec![0i64; batch * seq]))
                .context("building token_type_ids tensor")?;
            session.run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => types_tensor
            })
        } else {
            session.run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            })
        };
        let outputs = run.context("onnx embedding inference failed")?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("extracting last_hidden_state")?;
        data.to_vec()
    };

    let vectors = mean_pool(&hidden, &mask, batch, seq)?;
    debug!(batch, seq, dim = vectors.first().map_or(0, Vec::len), "embedded batch");
    Ok(vectors)
}

/// Average token states over the attention mask. `hidden` is `[batch, seq, dim]` row-major.
pub(crate) fn mean_pool(
    hidden: &[f32],
    mask: &[i64],
    batch: usize,
    seq: usize,
) -> Result<Vec<Vec<f32>>> {
    let tokens = batch * seq;
    anyhow::ensure!(
        tokens > 0 && mask.len() == tokens && hidden.len() % tokens == 0,
        "hidden state of {} values does not fit a {batch}x{seq} batch",
        hidden.len()
    );
    let dim = hidden.len() / tokens;

    Ok((0..batch)
        .map(|i| {
            let mut sum = vec![0.0f64; dim];
            let mut weight = 0.0f64;
            for j in 0..seq {
                let m = mask[i * seq + j] as f64;
                if m == 0.0 {
                    continue;
                }
                weight += m;
                let row = &hidden[(i * seq + j) * dim..(i * seq + j + 1) * dim];
                for (s, h) in sum.iter_mut().zip(row) {
                    *s += *h as f64 * m;
                }
            }
            if weight > 0.0 {
                sum.iter_mut().for_each(|s| *s /= weight);
            }
            sum.into_iter().map(|s| s as f32).collect()
        })
        .collect())
}

// src/embed/hashing.rs
//! Deterministic feature hashing of words and character trigrams.
//!
//! Offline stand-in for the sentence model: tests, CI and smoke runs without a model
//! download. Texts are only close when they share word stems, so it must not be used for
//! real filtration.

use anyhow::Result;
use async_trait::async_trait;

use super::Embedder;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        anyhow::ensure!(dimensions > 0, "hashing embedder needs dimensions >= 1");
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed one text synchronously. An input without word characters yields the zero vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in words(text) {
            self.bump(&mut v, b'w', word.as_bytes(), WORD_WEIGHT);

            let padded: Vec<char> = std::iter::once('<')
                .chain(word.chars())
                .chain(std::iter::once('>'))
                .collect();
            for gram in padded.windows(3) {
                let g: String = gram.iter().collect();
                self.bump(&mut v, b't', g.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn bump(&self, v: &mut [f32], namespace: u8, feature: &[u8], weight: f32) {
        let h = fnv1a64(namespace, feature);
        v[(h % self.dimensions as u64) as usize] += weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Stable 64-bit FNV-1a, so vectors do not depend on `std`'s hasher.
fn fnv1a64(namespace: u8, bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x00000100000001B3;
    let mut state = OFFSET;
    for &b in std::iter::once(&namespace).chain(bytes) {
        state ^= b as u64;
        state = state.wrapping_mul(PRIME);
    }
    state
}

//! Deterministic feature-hashing embeddings.
//!
//! [`HashingProvider`] needs no model files and no network: every lowercase word
//! token is hashed with FNV into one of `dimension` buckets with a hash-derived
//! sign, and the resulting bag-of-words vector is L2-normalized. Texts sharing
//! words get a positive cosine similarity, which is enough for offline runs and
//! for tests that need fixed, predictable neighbours.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{
    EmbeddingProvider, EmbeddingResult, EmbeddingVector, check_inputs, to_embedding,
};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
    model_id: String,
    max_input_chars: usize,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Self {
        Self::from_config(&EmbedConfig::hashing(dimension))
    }

    /// Uses `hashing_dimension`; the model id is always `hashing-<dimension>`, since
    /// the dimension alone fixes the mapping.
    pub fn from_config(config: &EmbedConfig) -> Self {
        Self {
            dimension: config.hashing_dimension,
            model_id: format!("hashing-{}", config.hashing_dimension),
            max_input_chars: config.max_input_chars,
        }
    }

    fn raw_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let mut hasher = FnvHasher::default();
            hasher.write(token.to_lowercase().as_bytes());
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config("hashing dimension must be at least 1"));
        }
        check_inputs(texts, self.max_input_chars)?;

        let embeddings = texts
            .iter()
            .enumerate()
            .map(|(index, text)| to_embedding(index, &self.raw_vector(text), true))
            .collect::<Result<Vec<EmbeddingVector>>>()?;

        tracing::debug!("Hashed {} texts into {} buckets", texts.len(), self.dimension);
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

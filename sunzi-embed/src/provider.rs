//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use half::f16;
use std::sync::{Arc, Mutex};

/// One embedding vector, stored at half precision.
pub type EmbeddingVector = Vec<f16>;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<EmbeddingVector>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result. The dimension is taken from the first vector
    /// (0 when empty).
    pub fn new(embeddings: Vec<EmbeddingVector>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
///
/// Implementations must be deterministic for a fixed model: the same text always
/// maps to the same vector. `embed_texts` preserves input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name of this provider's backend
    fn provider_name(&self) -> &str;

    /// Identity of the model; vectors from different model ids are not comparable
    fn model_id(&self) -> &str;
}

/// Reject inputs over the length limit instead of letting the tokenizer truncate them.
pub(crate) fn check_inputs(texts: &[String], max_input_chars: usize) -> Result<()> {
    for (index, text) in texts.iter().enumerate() {
        let chars = text.chars().count();
        if chars > max_input_chars {
            return Err(EmbedError::InputTooLong {
                index,
                chars,
                max: max_input_chars,
            });
        }
    }
    Ok(())
}

/// Convert a raw model output to a stored vector, optionally L2-normalizing it.
///
/// Non-finite values and zero vectors are errors: neither can be ranked by cosine
/// similarity.
pub fn to_embedding(index: usize, raw: &[f32], normalize: bool) -> Result<EmbeddingVector> {
    if raw.is_empty() {
        return Err(EmbedError::invalid_embedding(index, "empty vector"));
    }
    if raw.iter().any(|value| !value.is_finite()) {
        return Err(EmbedError::invalid_embedding(index, "non-finite values"));
    }

    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(EmbedError::invalid_embedding(index, "zero norm"));
    }

    let scale = if normalize { norm } else { 1.0 };
    let vector: EmbeddingVector = raw.iter().map(|x| f16::from_f32(x / scale)).collect();

    if vector.iter().any(|value| !value.is_finite()) {
        return Err(EmbedError::invalid_embedding(
            index,
            "values overflow half precision",
        ));
    }
    if vector.iter().all(|value| value.to_f32() == 0.0) {
        return Err(EmbedError::invalid_embedding(
            index,
            "zero norm after conversion",
        ));
    }
    Ok(vector)
}

/// Map a configured model id onto one of fastembed's built-in models.
pub fn fastembed_model(model_name: &str) -> Result<EmbeddingModel> {
    let model = match model_name
        .trim_start_matches("sentence-transformers/")
        .to_ascii_lowercase()
        .as_str()
    {
        "paraphrase-multilingual-minilm-l12-v2" => EmbeddingModel::ParaphraseMLMiniLML12V2,
        "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
        "all-minilm-l12-v2" => EmbeddingModel::AllMiniLML12V2,
        "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
        "multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
        _ => {
            return Err(EmbedError::UnknownModel {
                model: model_name.to_string(),
            });
        }
    };
    Ok(model)
}

/// FastEmbed-based embedding provider using local ONNX models
///
/// Each provider owns its loaded model. Construct one at startup and share it
/// behind an `Arc`; there is no process-wide model cache.
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Download (if needed) and load the configured model.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        let model_kind = fastembed_model(&config.model_name)?;

        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            config.model_name()
        );

        let load_config = config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let mut init_options =
                    InitOptions::new(model_kind).with_show_download_progress(true);
                if let Some(cache_dir) = &load_config.cache_dir {
                    init_options = init_options.with_cache_dir(cache_dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                // Probe once to learn the dimension and catch a broken model early.
                let probe = model
                    .embed(vec!["validation test".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let first = probe.first().ok_or(EmbedError::CountMismatch {
                    expected: 1,
                    actual: 0,
                })?;
                to_embedding(0, first, load_config.normalize)?;

                tracing::info!("Model loaded successfully. Dimension: {}", first.len());
                Ok((model, first.len()))
            })
            .await??;

        Ok(Self {
            config,
            model: Arc::new(Mutex::new(model)),
            dimension,
        })
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }
        check_inputs(texts, self.config.max_input_chars)?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.config.batch_size) {
            let batch = chunk.to_vec();
            let batch_len = batch.len();
            let model = Arc::clone(&self.model);

            let raw = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", batch.len());

                let mut model_guard = model.lock().map_err(|_| EmbedError::External {
                    source: anyhow::anyhow!("embedding model lock poisoned"),
                })?;
                model_guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            if raw.len() != batch_len {
                return Err(EmbedError::CountMismatch {
                    expected: batch_len,
                    actual: raw.len(),
                });
            }

            for vector in raw {
                let index = all_embeddings.len();
                if vector.len() != self.dimension {
                    return Err(EmbedError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                all_embeddings.push(to_embedding(index, &vector, self.config.normalize)?);
            }
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> &str {
        &self.config.model_name
    }
}

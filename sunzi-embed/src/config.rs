//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Multilingual sentence-transformers model, handles Turkish and English.
pub const DEFAULT_MODEL: &str = "paraphrase-multilingual-MiniLM-L12-v2";

/// Inputs longer than this are rejected instead of silently truncated by the tokenizer.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8192;

pub const DEFAULT_HASHING_DIMENSION: usize = 512;

/// Which embedding backend to construct
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local ONNX model through fastembed
    #[default]
    FastEmbed,
    /// Deterministic feature hashing, no model files
    Hashing,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::FastEmbed => write!(f, "fastembed"),
            ProviderKind::Hashing => write!(f, "hashing"),
        }
    }
}

/// Configuration for embedding models
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct EmbedConfig {
    /// Embedding backend
    #[builder(default)]
    pub provider: ProviderKind,
    /// Model identifier; part of every collection's identity
    #[builder(default = "DEFAULT_MODEL.to_string()")]
    pub model_name: String,
    /// Where downloaded model files are kept (fastembed's default when unset)
    #[builder(default)]
    pub cache_dir: Option<PathBuf>,
    /// Maximum batch size for embedding generation
    #[builder(default = "32")]
    pub batch_size: usize,
    /// Number of batches embedded concurrently during ingestion
    #[builder(default = "1")]
    pub concurrency: usize,
    /// Whether to L2-normalize embeddings
    #[builder(default = "true")]
    pub normalize: bool,
    /// Longest accepted input, in characters
    #[builder(default = "DEFAULT_MAX_INPUT_CHARS")]
    pub max_input_chars: usize,
    /// Vector length for the hashing provider
    #[builder(default = "DEFAULT_HASHING_DIMENSION")]
    pub hashing_dimension: usize,
    /// Number of query embeddings kept in memory; 0 disables the cache
    #[builder(default = "0")]
    pub query_cache_capacity: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model_name: DEFAULT_MODEL.to_string(),
            cache_dir: None,
            batch_size: 32,
            concurrency: 1,
            normalize: true,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            hashing_dimension: DEFAULT_HASHING_DIMENSION,
            query_cache_capacity: 0,
        }
    }
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// A fastembed configuration for `model_name` with all other settings defaulted
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// A hashing-provider configuration, used for tests and offline runs
    pub fn hashing(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hashing,
            model_name: format!("hashing-{dimension}"),
            hashing_dimension: dimension,
            ..Self::default()
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    pub fn with_cache_dir(self, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..self
        }
    }

    pub fn with_query_cache(self, query_cache_capacity: usize) -> Self {
        Self {
            query_cache_capacity,
            ..self
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Check that every numeric setting is usable
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(EmbedError::invalid_config("concurrency must be at least 1"));
        }
        if self.max_input_chars == 0 {
            return Err(EmbedError::invalid_config(
                "max_input_chars must be at least 1",
            ));
        }
        if self.provider == ProviderKind::Hashing && self.hashing_dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hashing_dimension must be at least 1",
            ));
        }
        tracing::debug!("Embedding configuration valid for: {}", self.model_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_creation() {
        let config = EmbedConfig::new("all-MiniLM-L6-v2");

        assert_eq!(config.model_name(), "all-MiniLM-L6-v2");
        assert_eq!(config.provider, ProviderKind::FastEmbed);
        assert_eq!(config.batch_size, 32);
        assert!(config.normalize);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::default()
            .with_batch_size(64)
            .with_normalize(false)
            .with_cache_dir(temp_dir.path())
            .with_query_cache(100);

        assert_eq!(config.batch_size, 64);
        assert!(!config.normalize);
        assert_eq!(config.cache_dir.as_deref(), Some(temp_dir.path()));
        assert_eq!(config.query_cache_capacity, 100);
    }

    #[test]
    fn test_derive_builder_pattern() {
        let config = EmbedConfig::builder()
            .provider(ProviderKind::Hashing)
            .model_name("hashing-64")
            .hashing_dimension(64usize)
            .batch_size(128usize)
            .build()
            .unwrap();

        assert_eq!(config.model_name, "hashing-64");
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.hashing_dimension, 64);
        assert_eq!(config.max_input_chars, DEFAULT_MAX_INPUT_CHARS);
    }

    #[test]
    fn test_builder_defaults_match_default() {
        let built = EmbedConfig::builder().build().unwrap();
        assert_eq!(built, EmbedConfig::default());
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        assert!(EmbedConfig::default().with_batch_size(0).validate().is_err());
        assert!(EmbedConfig::new("  ").validate().is_err());
        assert!(EmbedConfig::hashing(0).validate().is_err());

        let config = EmbedConfig {
            concurrency: 0,
            ..EmbedConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_hashing_config() {
        let config = EmbedConfig::hashing(128);
        assert_eq!(config.provider, ProviderKind::Hashing);
        assert_eq!(config.model_name(), "hashing-128");
        assert_eq!(config.provider.to_string(), "hashing");
    }
}

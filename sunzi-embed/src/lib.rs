//! # sunzi-embed
//!
//! Text embeddings for the sunzi retrieval pipeline, behind the async
//! [`EmbeddingProvider`] trait.
//!
//! ## Providers
//!
//! - [`FastEmbedProvider`]: local ONNX models via fastembed. The default model is
//!   the multilingual `paraphrase-multilingual-MiniLM-L12-v2`.
//! - [`HashingProvider`]: deterministic feature hashing with no model files, for
//!   offline runs and tests.
//! - [`CachingProvider`]: wraps any provider and memoizes query embeddings.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sunzi_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let texts = vec!["Know your enemy.".to_string(), "Speed wins wars.".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! Embeddings are stored at half precision (f16), L2-normalized by default, and
//! deterministic for a fixed model. A failure is always an [`EmbedError`]; no
//! provider returns a zero vector in place of an error.

pub mod cache;
pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

use std::sync::Arc;

pub use cache::CachingProvider;
pub use config::{DEFAULT_MODEL, EmbedConfig, EmbedConfigBuilder, ProviderKind};
pub use error::{EmbedError, Result};
pub use hashing::HashingProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, EmbeddingVector, FastEmbedProvider};

/// Construct the provider described by `config`, wrapped in a query cache when
/// `query_cache_capacity` is non-zero.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    let capacity = config.query_cache_capacity;

    let provider: Arc<dyn EmbeddingProvider> = match (config.provider, capacity) {
        (ProviderKind::Hashing, 0) => Arc::new(HashingProvider::from_config(config)),
        (ProviderKind::Hashing, _) => Arc::new(CachingProvider::new(
            HashingProvider::from_config(config),
            capacity,
        )),
        (ProviderKind::FastEmbed, 0) => Arc::new(FastEmbedProvider::create(config.clone()).await?),
        (ProviderKind::FastEmbed, _) => Arc::new(CachingProvider::new(
            FastEmbedProvider::create(config.clone()).await?,
            capacity,
        )),
    };

    tracing::info!(
        provider = provider.provider_name(),
        model = provider.model_id(),
        dimension = provider.embedding_dimension(),
        "Embedding provider ready"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_hashing_provider() {
        let provider = create_provider(&EmbedConfig::hashing(48)).await.unwrap();
        assert_eq!(provider.provider_name(), "hashing");
        assert_eq!(provider.embedding_dimension(), 48);
    }

    #[tokio::test]
    async fn test_create_cached_provider_keeps_identity() {
        let config = EmbedConfig::hashing(48).with_query_cache(16);
        let provider = create_provider(&config).await.unwrap();
        assert_eq!(provider.model_id(), "hashing-48");

        let a = provider.embed_text("attack by fire").await.unwrap();
        let b = provider.embed_text("attack by fire").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = EmbedConfig::hashing(48).with_batch_size(0);
        assert!(matches!(
            create_provider(&config).await,
            Err(EmbedError::InvalidConfig { .. })
        ));
    }
}

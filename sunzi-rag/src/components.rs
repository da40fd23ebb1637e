//! Startup construction of long-lived handles.
//!
//! Everything the pipeline needs is built once from a [`RagConfig`] and shared by
//! `Arc`. There are no process-wide singletons; two `Components` built from
//! different configurations are fully independent.

use crate::config::{ApiKey, RagConfig, StorageKind};
use crate::error::{RagError, Result};
use crate::generator::{GeminiGenerator, Generator};
use crate::ingest::Ingestor;
use crate::pipeline::RagPipeline;
use crate::prompt::PromptAssembler;
use crate::retriever::Retriever;
use std::sync::Arc;
use sunzi_chunk::Chunker;
use sunzi_embed::{EmbeddingProvider, create_provider};
use sunzi_index::{MemoryIndex, SqliteIndex, VectorIndex};

#[derive(Clone)]
pub struct Components {
    pub config: RagConfig,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    /// `None` when no credential was supplied; retrieval still works without it
    pub generator: Option<Arc<dyn Generator>>,
}

impl Components {
    /// Build the embedder, open the index and, if a key is given, create the
    /// generator. With `generation.discover_model` set, the generator asks the
    /// backend for its model list and falls back to an available model.
    pub async fn init(config: RagConfig, api_key: Option<ApiKey>) -> Result<Self> {
        config.validate()?;

        let embedder = create_provider(&config.embedding).await?;

        let index: Arc<dyn VectorIndex> = match config.storage.mode {
            StorageKind::Durable => Arc::new(SqliteIndex::open(&config.storage.path).await?),
            StorageKind::Memory => Arc::new(MemoryIndex::new()),
        };
        tracing::info!("Vector index: {}", index.storage_mode());

        let generator: Option<Arc<dyn Generator>> = match api_key {
            Some(key) => {
                let mut gemini = GeminiGenerator::new(&config.generation, key)?;
                if config.generation.discover_model {
                    gemini = gemini.select_available_model().await?;
                }
                tracing::info!("Generation model: {}", gemini.model_id());
                Some(Arc::new(gemini))
            }
            None => {
                tracing::debug!("No generation credential; answering is disabled");
                None
            }
        };

        Ok(Self {
            config,
            embedder,
            index,
            generator,
        })
    }

    /// Replace the generator, e.g. with a local model or a test double.
    pub fn with_generator(self, generator: Arc<dyn Generator>) -> Self {
        Self {
            generator: Some(generator),
            ..self
        }
    }

    pub fn ingestor(&self) -> Result<Ingestor> {
        let chunker = Chunker::new(self.chunker_config())?;
        Ok(
            Ingestor::new(chunker, self.embedder.clone(), self.index.clone()).with_batching(
                self.config.embedding.batch_size,
                self.config.embedding.concurrency,
            ),
        )
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(self.embedder.clone(), self.index.clone()).with_dedup(self.config.dedup)
    }

    pub fn pipeline(&self) -> Result<RagPipeline> {
        let generator = self.generator.clone().ok_or_else(|| {
            RagError::config(format!(
                "no generation credential; set {}",
                crate::config::API_KEY_VARS.join(" or ")
            ))
        })?;
        Ok(RagPipeline::new(
            self.retriever(),
            PromptAssembler::new(&self.config.generation.subject),
            generator,
            &self.config.collection,
            self.config.top_k,
        ))
    }

    /// Chunk labels default to the corpus file name.
    fn chunker_config(&self) -> sunzi_chunk::ChunkerConfig {
        let mut chunking = self.config.chunking.clone();
        if chunking.source_label == sunzi_chunk::ChunkerConfig::default().source_label {
            if let Some(name) = self.config.corpus.file_name() {
                chunking.source_label = name.to_string_lossy().into_owned();
            }
        }
        chunking
    }
}

//! Corpus ingestion
//!
//! Reads the corpus, chunks it, embeds the chunks in batches and replaces the
//! collection's contents in one atomic rebuild. Any failure aborts the whole
//! ingestion and leaves the previous generation live.

use crate::error::{RagError, Result};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sunzi_chunk::{Chunk, Chunker};
use sunzi_embed::{EmbedError, EmbeddingProvider};
use sunzi_index::{CollectionInfo, CollectionMeta, IndexError, IndexedEntry, VectorIndex};

/// Progress is logged at info level each time this many more chunks are embedded.
const PROGRESS_INTERVAL: usize = 10;

/// Result of a completed ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub generation: i64,
    pub chunks: usize,
    /// `None` when the corpus produced no chunks
    pub dimension: Option<usize>,
    pub model_id: String,
    pub fingerprint: String,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// What [`Ingestor::ensure`] did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnsureStatus {
    /// The existing collection matches the corpus and model
    Reused(CollectionInfo),
    Rebuilt(IngestReport),
}

/// Blake3 digest of the corpus text, hex encoded.
pub fn fingerprint(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            batch_size: 32,
            concurrency: 1,
        }
    }

    /// Texts per embedding call and number of calls in flight. Zero is treated as one.
    pub fn with_batching(self, batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            ..self
        }
    }

    /// Ingest the corpus file at `path` into `collection`.
    pub async fn ingest(&self, collection: &str, path: &Path) -> Result<IngestReport> {
        let text = read_corpus(path).await?;
        tracing::info!("Ingesting {} into '{}'", path.display(), collection);
        self.ingest_text(collection, &text).await
    }

    pub async fn ingest_text(&self, collection: &str, text: &str) -> Result<IngestReport> {
        let started = Instant::now();
        let fingerprint = fingerprint(text);
        let chunks = self.chunker.chunk(text);
        tracing::info!("Corpus split into {} chunks", chunks.len());

        let entries = self.embed_chunks(chunks).await?;
        let dimension = entries.first().map(|e| e.vector().len());
        let count = entries.len();
        let model_id = self.embedder.model_id().to_string();

        let handle = self
            .index
            .rebuild_collection(
                collection,
                CollectionMeta::new(model_id.clone(), fingerprint.clone()),
                entries,
            )
            .await?;

        let report = IngestReport {
            collection: collection.to_string(),
            generation: handle.generation(),
            chunks: count,
            dimension,
            model_id,
            fingerprint,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Stored {} chunks in '{}' (generation {}) in {:.2?}",
            report.chunks,
            report.collection,
            report.generation,
            report.elapsed
        );
        Ok(report)
    }

    /// Rebuild `collection` from the corpus at `path` unless it already holds that
    /// corpus embedded with the current model.
    pub async fn ensure(&self, collection: &str, path: &Path) -> Result<EnsureStatus> {
        let text = read_corpus(path).await?;
        let expected = CollectionMeta::new(self.embedder.model_id(), fingerprint(&text));

        // An empty collection built from an empty corpus is still up to date.
        let reason = match self.index.collection_info(collection).await {
            Ok(info) if info.meta.model_id.is_none() => "it has no build metadata",
            Ok(info) if info.meta.model_id != expected.model_id => {
                "it was built with a different model"
            }
            Ok(info) if info.meta.source_fingerprint != expected.source_fingerprint => {
                "the corpus has changed"
            }
            Ok(info) => {
                tracing::info!(
                    "Using collection '{}' ({} chunks, generation {})",
                    collection,
                    info.entry_count,
                    info.generation
                );
                return Ok(EnsureStatus::Reused(info));
            }
            Err(IndexError::NotFound { .. }) => "it does not exist",
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Rebuilding collection '{}': {}", collection, reason);
        let report = self.ingest_text(collection, &text).await?;
        Ok(EnsureStatus::Rebuilt(report))
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<IndexedEntry>> {
        let total = chunks.len();
        let batches: Vec<Vec<Chunk>> = chunks
            .chunks(self.batch_size)
            .map(<[Chunk]>::to_vec)
            .collect();

        let mut embedded = 0usize;
        let mut entries = Vec::with_capacity(total);
        let mut results = std::pin::pin!(
            futures::stream::iter(batches)
                .map(|batch| self.embed_batch(batch))
                .buffered(self.concurrency)
        );

        while let Some(batch) = results.try_next().await? {
            let before = embedded;
            embedded += batch.len();
            entries.extend(batch);

            tracing::debug!("Embedded batch, {}/{} chunks done", embedded, total);
            if embedded / PROGRESS_INTERVAL > before / PROGRESS_INTERVAL || embedded == total {
                tracing::info!("Embedded {}/{} chunks", embedded, total);
            }
        }
        Ok(entries)
    }

    async fn embed_batch(&self, batch: Vec<Chunk>) -> Result<Vec<IndexedEntry>> {
        let texts: Vec<String> = batch.iter().map(|c| c.text().to_string()).collect();
        let result = self.embedder.embed_texts(&texts).await?;
        if result.len() != batch.len() {
            return Err(RagError::Embed(EmbedError::CountMismatch {
                expected: batch.len(),
                actual: result.len(),
            }));
        }
        Ok(batch
            .into_iter()
            .zip(result.embeddings)
            .map(|(chunk, vector)| IndexedEntry::new(chunk, vector))
            .collect())
    }
}

async fn read_corpus(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RagError::Corpus {
            path: path.to_path_buf(),
            source,
        })
}

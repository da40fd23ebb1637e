//! Query-time retrieval: embed the query, then ask the index for its nearest chunks.

use crate::error::{RagError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use sunzi_embed::{EmbeddingProvider, EmbeddingVector};
use sunzi_index::{CollectionInfo, RetrievalResult, VectorIndex};

/// Embeds queries and looks them up in a [`VectorIndex`].
///
/// Holds shared handles only; cloning is cheap and clones may be used from
/// concurrent requests.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    dedup: bool,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            dedup: false,
        }
    }

    /// Drop results whose normalized text repeats a higher-ranked result.
    pub fn with_dedup(self, dedup: bool) -> Self {
        Self { dedup, ..self }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// The `k` chunks of `collection` most similar to `query`, best first.
    pub async fn retrieve(&self, collection: &str, query: &str, k: usize) -> Result<RetrievalResult> {
        check_request(query, k)?;
        let vector = self.embed_query(query).await?;
        self.search(collection, &vector, k).await
    }

    /// Embed a query. Blank queries are rejected before the embedder is called.
    pub async fn embed_query(&self, query: &str) -> Result<EmbeddingVector> {
        check_query(query)?;
        Ok(self.embedder.embed_text(query).await?)
    }

    /// Nearest neighbours of an already embedded query.
    ///
    /// The model check and the query must see the same generation. Generations only
    /// grow, so an unchanged generation after the query means no rebuild landed in
    /// between; otherwise the lookup is repeated against the new generation.
    pub async fn search(
        &self,
        collection: &str,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::invalid_argument("k must be at least 1"));
        }

        loop {
            let info = self.index.collection_info(collection).await?;
            self.check_model(&info)?;

            let hits = self.query(collection, vector, k).await?;
            let after = self.index.collection_info(collection).await?;
            if after.generation == info.generation {
                return Ok(hits);
            }
            tracing::debug!(
                "Collection '{}' was rebuilt during the query (generation {} -> {}), retrying",
                collection,
                info.generation,
                after.generation
            );
        }
    }

    fn check_model(&self, info: &CollectionInfo) -> Result<()> {
        match &info.meta.model_id {
            Some(built_with) if built_with != self.embedder.model_id() => {
                Err(RagError::ModelMismatch {
                    collection: info.name.clone(),
                    built_with: built_with.clone(),
                    configured: self.embedder.model_id().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn query(
        &self,
        collection: &str,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<RetrievalResult> {
        let handle = self.index.collection(collection).await?;
        if !self.dedup {
            return Ok(self.index.query(&handle, vector, k).await?);
        }

        // Duplicates use up slots, so widen the request until k distinct texts are
        // found or the collection is exhausted.
        let mut fetch = k.saturating_mul(2);
        loop {
            let hits = self.index.query(&handle, vector, fetch).await?;
            let exhausted = hits.len() < fetch;
            let mut distinct = dedup_by_text(hits);
            if distinct.len() >= k || exhausted {
                distinct.truncate(k);
                return Ok(distinct);
            }
            fetch = fetch.saturating_mul(2);
        }
    }
}

fn check_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::invalid_argument("query must not be empty"));
    }
    Ok(())
}

fn check_request(query: &str, k: usize) -> Result<()> {
    check_query(query)?;
    if k == 0 {
        return Err(RagError::invalid_argument("k must be at least 1"));
    }
    Ok(())
}

/// Keep the first (highest-ranked) chunk for each normalized text.
fn dedup_by_text(hits: RetrievalResult) -> RetrievalResult {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.chunk.normalized_text()))
        .collect()
}

//! Query-embedding cache.

use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingResult, EmbeddingVector};
use async_trait::async_trait;
use fnv::FnvHashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type CacheKey = (String, String);

#[derive(Default)]
struct CacheState {
    entries: FnvHashMap<CacheKey, EmbeddingVector>,
    order: VecDeque<CacheKey>,
}

/// Wraps a provider and memoizes `embed_text` results.
///
/// Entries are keyed by model id and text, so a vector is never served for a
/// different model. Batch calls (`embed_texts`) pass straight through: they are
/// used for ingestion and are not worth caching. When full, the oldest entry is
/// evicted.
pub struct CachingProvider<P> {
    inner: P,
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<P: EmbeddingProvider> CachingProvider<P> {
    pub fn new(inner: P, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(CacheState::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // The state is only ever mutated by whole-entry inserts and removals.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(&self, text: &str) -> CacheKey {
        (self.inner.model_id().to_string(), text.to_string())
    }
}

impl<P> std::fmt::Debug for CachingProvider<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingProvider")
            .field("capacity", &self.capacity)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachingProvider<P> {
    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector> {
        let key = self.key(text);
        let cached = self.lock().entries.get(&key).cloned();
        if let Some(vector) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = self.inner.embed_text(text).await?;

        if self.capacity > 0 {
            let mut state = self.lock();
            if !state.entries.contains_key(&key) {
                while state.entries.len() >= self.capacity {
                    match state.order.pop_front() {
                        Some(oldest) => {
                            state.entries.remove(&oldest);
                        }
                        None => break,
                    }
                }
                state.order.push_back(key.clone());
                state.entries.insert(key, vector.clone());
            }
        }
        Ok(vector)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        self.inner.embed_texts(texts).await
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

//! Storage abstraction for vector collections
//!
//! A [`VectorIndex`] holds named collections of [`IndexedEntry`]s (a chunk and its
//! embedding, never one without the other) and answers exact nearest-neighbour
//! queries over them.
//!
//! ## Backends
//!
//! - [`sqlite_store::SqliteIndex`]: durable, one SQLite database (WAL) in a directory
//!   given at startup; survives restarts.
//! - [`memory_store::MemoryIndex`]: in-memory, gone when the process exits.
//!
//! ## Generations
//!
//! Every collection has a live generation number. [`VectorIndex::replace_collection`]
//! and [`VectorIndex::rebuild_collection`] bump it and switch readers over in one
//! step, so a query sees either the complete old contents or the complete new
//! contents. A [`Collection`] handle remembers the generation it was obtained for;
//! inserting through a handle whose generation has been replaced fails with
//! [`IndexError::StaleHandle`](crate::IndexError::StaleHandle).

use crate::error::{IndexError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use sunzi_chunk::Chunk;

pub mod memory_store;
pub mod sqlite_store;

pub use sunzi_chunk::ChunkId;

/// A chunk together with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    chunk: Chunk,
    vector: Vec<f16>,
}

impl IndexedEntry {
    pub fn new(chunk: Chunk, vector: Vec<f16>) -> Self {
        Self { chunk, vector }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn vector(&self) -> &[f16] {
        &self.vector
    }

    pub fn into_parts(self) -> (Chunk, Vec<f16>) {
        (self.chunk, self.vector)
    }
}

/// One query hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query, in `[-1, 1]`
    pub score: f32,
}

/// Hits ordered by descending score, ties by ascending chunk id.
pub type RetrievalResult = Vec<ScoredChunk>;

/// Provenance recorded when a collection is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionMeta {
    /// Embedding model every vector in the collection came from
    pub model_id: Option<String>,
    /// Fingerprint of the corpus the chunks came from
    pub source_fingerprint: Option<String>,
}

impl CollectionMeta {
    pub fn new(model_id: impl Into<String>, source_fingerprint: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            source_fingerprint: Some(source_fingerprint.into()),
        }
    }
}

/// Handle to a collection at a particular generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Collection {
    name: String,
    generation: i64,
}

impl Collection {
    pub(crate) fn new(name: impl Into<String>, generation: i64) -> Self {
        Self {
            name: name.into(),
            generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }
}

/// Summary of a collection, as listed by [`VectorIndex::list_collections`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub generation: i64,
    /// `None` until the first vector is stored
    pub dimension: Option<usize>,
    #[serde(flatten)]
    pub meta: CollectionMeta,
    pub entry_count: usize,
    pub built_at: DateTime<Utc>,
}

/// Whether collections outlive the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Durable { path: PathBuf },
    InMemory,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Durable { path } => write!(f, "durable ({})", path.display()),
            StorageMode::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Named collections of embedded chunks with exact cosine search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create an empty collection. Fails with `AlreadyExists` if the name is taken.
    async fn create_collection(&self, name: &str) -> Result<Collection>;

    /// Drop the contents of `name` (creating it if needed) and return a handle to
    /// the new, empty generation. The name stays resolvable throughout.
    async fn replace_collection(&self, name: &str) -> Result<Collection>;

    /// Handle to the live generation of `name`.
    async fn collection(&self, name: &str) -> Result<Collection>;

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo>;

    /// All collections, ordered by name.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Append entries to the handle's generation in one transaction; either all
    /// entries are stored or none are. Returns the number stored.
    async fn insert(&self, collection: &Collection, entries: Vec<IndexedEntry>) -> Result<usize>;

    /// Build a new generation from `entries` and make it live in one step,
    /// discarding the previous contents. Creates the collection if absent.
    async fn rebuild_collection(
        &self,
        name: &str,
        meta: CollectionMeta,
        entries: Vec<IndexedEntry>,
    ) -> Result<Collection>;

    /// The `k` entries of the live generation most similar to `vector`.
    async fn query(
        &self,
        collection: &Collection,
        vector: &[f16],
        k: usize,
    ) -> Result<RetrievalResult>;

    fn storage_mode(&self) -> StorageMode;
}

pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(IndexError::invalid_argument(
            "collection name must not be empty",
        ));
    }
    Ok(())
}

pub(crate) fn check_query(vector: &[f16], k: usize, dimension: Option<usize>) -> Result<()> {
    if k == 0 {
        return Err(IndexError::invalid_argument("k must be at least 1"));
    }
    if vector.iter().all(|x| x.to_f32() == 0.0) || vector.iter().any(|x| !x.is_finite()) {
        return Err(IndexError::invalid_argument(
            "query vector must be finite and non-zero",
        ));
    }
    if let Some(expected) = dimension {
        if vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}

/// Check a batch before anything is written: consistent non-zero dimension and no
/// id repeated within the batch or already in `existing`. Returns the batch dimension.
pub(crate) fn check_entries(
    collection: &str,
    entries: &[IndexedEntry],
    dimension: Option<usize>,
    existing: &HashSet<ChunkId>,
) -> Result<Option<usize>> {
    let mut expected = dimension;
    let mut seen = HashSet::with_capacity(entries.len());

    for entry in entries {
        let actual = entry.vector.len();
        if actual == 0 {
            return Err(IndexError::invalid_argument("vectors must not be empty"));
        }
        match expected {
            Some(expected) if expected != actual => {
                return Err(IndexError::DimensionMismatch { expected, actual });
            }
            None => expected = Some(actual),
            _ => {}
        }

        let id = entry.chunk.id();
        if !seen.insert(id) || existing.contains(&id) {
            return Err(IndexError::DuplicateId {
                collection: collection.to_string(),
                id,
            });
        }
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: ChunkId, dims: usize) -> IndexedEntry {
        IndexedEntry::new(
            Chunk::new(id, format!("chunk {id}"), format!("c:{id}")),
            vec![f16::from_f32(1.0); dims],
        )
    }

    #[test]
    fn test_check_entries_dimension() {
        let none = HashSet::new();
        assert_eq!(
            check_entries("c", &[entry(0, 3), entry(1, 3)], None, &none).unwrap(),
            Some(3)
        );
        assert!(matches!(
            check_entries("c", &[entry(0, 3), entry(1, 4)], None, &none),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
        assert!(matches!(
            check_entries("c", &[entry(0, 3)], Some(5), &none),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            check_entries("c", &[entry(0, 0)], None, &none),
            Err(IndexError::InvalidArgument { .. })
        ));
        assert_eq!(check_entries("c", &[], Some(7), &none).unwrap(), Some(7));
    }

    #[test]
    fn test_check_entries_duplicates() {
        let existing: HashSet<ChunkId> = [4].into_iter().collect();
        assert!(matches!(
            check_entries("c", &[entry(1, 2), entry(1, 2)], None, &HashSet::new()),
            Err(IndexError::DuplicateId { id: 1, .. })
        ));
        assert!(matches!(
            check_entries("c", &[entry(4, 2)], None, &existing),
            Err(IndexError::DuplicateId { id: 4, .. })
        ));
    }

    #[test]
    fn test_check_query() {
        let q = vec![f16::from_f32(1.0), f16::from_f32(0.0)];
        assert!(check_query(&q, 1, Some(2)).is_ok());
        assert!(check_query(&q, 1, None).is_ok());
        assert!(matches!(
            check_query(&q, 0, Some(2)),
            Err(IndexError::InvalidArgument { .. })
        ));
        assert!(matches!(
            check_query(&q, 3, Some(4)),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(check_query(&[f16::ZERO, f16::ZERO], 1, None).is_err());
    }
}

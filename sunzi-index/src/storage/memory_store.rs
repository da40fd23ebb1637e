//! In-memory vector index
//!
//! Each collection's live generation is an `Arc` snapshot behind a lock. Readers
//! clone the `Arc` and rank without holding the lock; rebuilds assemble the next
//! generation off to the side and swap the pointer, so a reader holds either the
//! old complete snapshot or the new one.

use super::{
    ChunkId, Collection, CollectionInfo, CollectionMeta, IndexedEntry, RetrievalResult,
    StorageMode, VectorIndex, check_entries, check_name, check_query,
};
use crate::error::{IndexError, Result};
use crate::similarity::rank;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct Generation {
    number: i64,
    dimension: Option<usize>,
    meta: CollectionMeta,
    entries: Vec<IndexedEntry>,
    ids: HashSet<ChunkId>,
    built_at: DateTime<Utc>,
}

impl Generation {
    fn empty(number: i64) -> Self {
        Self {
            number,
            dimension: None,
            meta: CollectionMeta::default(),
            entries: Vec::new(),
            ids: HashSet::new(),
            built_at: Utc::now(),
        }
    }

    fn info(&self, name: &str) -> CollectionInfo {
        CollectionInfo {
            name: name.to_string(),
            generation: self.number,
            dimension: self.dimension,
            meta: self.meta.clone(),
            entry_count: self.entries.len(),
            built_at: self.built_at,
        }
    }
}

/// [`VectorIndex`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, Arc<Generation>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation replaces or pushes whole values, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Generation>>> {
        self.collections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Generation>>> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, name: &str) -> Result<Arc<Generation>> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::not_found(name))
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn create_collection(&self, name: &str) -> Result<Collection> {
        check_name(name)?;
        let mut collections = self.write();
        if collections.contains_key(name) {
            return Err(IndexError::AlreadyExists {
                name: name.to_string(),
            });
        }
        collections.insert(name.to_string(), Arc::new(Generation::empty(1)));
        tracing::info!("Created collection '{}'", name);
        Ok(Collection::new(name, 1))
    }

    async fn replace_collection(&self, name: &str) -> Result<Collection> {
        check_name(name)?;
        let mut collections = self.write();
        let number = collections.get(name).map_or(1, |g| g.number + 1);
        collections.insert(name.to_string(), Arc::new(Generation::empty(number)));
        tracing::info!("Replaced collection '{}' (generation {})", name, number);
        Ok(Collection::new(name, number))
    }

    async fn collection(&self, name: &str) -> Result<Collection> {
        let generation = self.snapshot(name)?;
        Ok(Collection::new(name, generation.number))
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        Ok(self.snapshot(name)?.info(name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut infos: Vec<CollectionInfo> = self
            .read()
            .iter()
            .map(|(name, generation)| generation.info(name))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn insert(&self, collection: &Collection, entries: Vec<IndexedEntry>) -> Result<usize> {
        let name = collection.name();
        let mut collections = self.write();
        let live = collections
            .get_mut(name)
            .ok_or_else(|| IndexError::not_found(name))?;
        if live.number != collection.generation() {
            return Err(IndexError::StaleHandle {
                name: name.to_string(),
                handle: collection.generation(),
                live: live.number,
            });
        }

        let dimension = check_entries(name, &entries, live.dimension, &live.ids)?;
        let count = entries.len();

        // Copy-on-write: readers holding the previous snapshot keep it unchanged.
        let generation = Arc::make_mut(live);
        generation.dimension = dimension;
        generation.ids.extend(entries.iter().map(|e| e.chunk().id()));
        generation.entries.extend(entries);

        tracing::debug!("Inserted {} entries into '{}'", count, name);
        Ok(count)
    }

    async fn rebuild_collection(
        &self,
        name: &str,
        meta: CollectionMeta,
        entries: Vec<IndexedEntry>,
    ) -> Result<Collection> {
        check_name(name)?;
        let dimension = check_entries(name, &entries, None, &HashSet::new())?;

        let mut next = Generation::empty(0);
        next.dimension = dimension;
        next.meta = meta;
        next.ids = entries.iter().map(|e| e.chunk().id()).collect();
        next.entries = entries;

        let mut collections = self.write();
        next.number = collections.get(name).map_or(1, |g| g.number + 1);
        let number = next.number;
        let count = next.entries.len();
        collections.insert(name.to_string(), Arc::new(next));

        tracing::info!(
            "Rebuilt collection '{}' with {} entries (generation {})",
            name,
            count,
            number
        );
        Ok(Collection::new(name, number))
    }

    async fn query(
        &self,
        collection: &Collection,
        vector: &[f16],
        k: usize,
    ) -> Result<RetrievalResult> {
        let snapshot = self.snapshot(collection.name())?;
        check_query(vector, k, snapshot.dimension)?;

        Ok(rank(
            vector,
            snapshot.entries.iter().map(|e| (e.chunk(), e.vector())),
            k,
        ))
    }

    fn storage_mode(&self) -> StorageMode {
        StorageMode::InMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunzi_chunk::Chunk;
    use tracing_test::traced_test;

    fn entry(id: i64, values: &[f32]) -> IndexedEntry {
        IndexedEntry::new(
            Chunk::new(id, format!("teaching {id}"), format!("m:{id}")),
            values.iter().copied().map(f16::from_f32).collect(),
        )
    }

    #[tokio::test]
    async fn test_reader_snapshot_is_unaffected_by_insert() {
        let index = MemoryIndex::new();
        let collection = index.create_collection("c").await.unwrap();
        index
            .insert(&collection, vec![entry(0, &[1.0, 0.0])])
            .await
            .unwrap();

        let before = index.snapshot("c").unwrap();
        index
            .insert(&collection, vec![entry(1, &[0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(before.entries.len(), 1);
        assert_eq!(index.snapshot("c").unwrap().entries.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_against_stored_ids() {
        let index = MemoryIndex::new();
        let collection = index.create_collection("c").await.unwrap();
        index
            .insert(&collection, vec![entry(3, &[1.0, 0.0])])
            .await
            .unwrap();

        let result = index.insert(&collection, vec![entry(3, &[0.0, 1.0])]).await;
        assert!(matches!(result, Err(IndexError::DuplicateId { id: 3, .. })));
        assert_eq!(index.collection_info("c").await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rebuild_is_logged() {
        let index = MemoryIndex::new();
        index
            .rebuild_collection("c", CollectionMeta::default(), vec![entry(0, &[1.0])])
            .await
            .unwrap();
        assert!(logs_contain("Rebuilt collection 'c' with 1 entries (generation 1)"));
    }

    #[tokio::test]
    async fn test_storage_mode() {
        assert_eq!(MemoryIndex::new().storage_mode(), StorageMode::InMemory);
    }
}

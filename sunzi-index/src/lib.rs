//! sunzi-index: named collections of embedded chunks with exact cosine search
//!
//! ## Key Modules
//!
//! - **[`storage`]**: the [`VectorIndex`] trait, its data types, and the SQLite
//!   (durable) and in-memory backends
//! - **[`similarity`]**: cosine scoring and result ordering shared by both backends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use half::f16;
//! use sunzi_chunk::Chunk;
//! use sunzi_index::{CollectionMeta, IndexedEntry, SqliteIndex, VectorIndex};
//!
//! # async fn example() -> Result<(), sunzi_index::IndexError> {
//! let index = SqliteIndex::open(std::path::Path::new("./index")).await?;
//! let entries = vec![IndexedEntry::new(
//!     Chunk::new(0, "Know your enemy.", "corpus.txt:1"),
//!     vec![f16::from_f32(1.0), f16::from_f32(0.0)],
//! )];
//! let collection = index
//!     .rebuild_collection("sun_tzu", CollectionMeta::new("my-model", "fingerprint"), entries)
//!     .await?;
//! let hits = index
//!     .query(&collection, &[f16::from_f32(1.0), f16::from_f32(0.0)], 3)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod similarity;
pub mod storage;

pub use error::{IndexError, Result};
pub use storage::memory_store::MemoryIndex;
pub use storage::sqlite_store::SqliteIndex;
pub use storage::{
    Collection, CollectionInfo, CollectionMeta, IndexedEntry, RetrievalResult, ScoredChunk,
    StorageMode, VectorIndex,
};

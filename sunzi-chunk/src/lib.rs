pub mod error;
pub mod text;

pub use error::{ChunkError, Result};
pub use text::{Boundary, Chunk, ChunkId, Chunker, ChunkerConfig, DEFAULT_MIN_CHARS};

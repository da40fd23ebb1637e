//! Error types for vector index operations

use crate::storage::ChunkId;

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// `create_collection` on a name that is already present
    #[error("Collection '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Collection '{name}' not found")]
    NotFound { name: String },

    /// A chunk id occurs twice in a batch, or is already stored in the collection
    #[error("Duplicate chunk id {id} in collection '{collection}'")]
    DuplicateId { collection: String, id: ChunkId },

    /// Vectors of different lengths cannot share a collection
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The handle refers to a generation that has since been replaced
    #[error("Collection '{name}' was rebuilt (handle generation {handle}, live generation {live})")]
    StaleHandle { name: String, handle: i64, live: i64 },

    /// Stored data that cannot be decoded
    #[error("Corrupt index data: {message}")]
    Corrupt { message: String },

    #[error("Storage error: {source}")]
    Storage {
        #[from]
        source: sqlx::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl IndexError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn corrupt<S: Into<String>>(message: S) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }
}

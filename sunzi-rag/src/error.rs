//! Error types for the retrieval-and-generation pipeline

use crate::generator::GenerationFailure;
use serde::Serialize;
use std::path::PathBuf;
use sunzi_chunk::ChunkError;
use sunzi_embed::EmbedError;
use sunzi_index::IndexError;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// The coarse category every pipeline failure falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    EmbedError,
    IndexError,
    GenerationError,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::EmbedError => "embedding error",
            ErrorKind::IndexError => "index error",
            ErrorKind::GenerationError => "generation error",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration that cannot be used (bad file, failed validation, missing key)
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Cannot read corpus {}: {source}", path.display())]
    Corpus {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    /// The collection was built with a different embedding model than the one configured
    #[error(
        "Collection '{collection}' was built with model '{built_with}', but '{configured}' is configured; re-run ingestion"
    )]
    ModelMismatch {
        collection: String,
        built_with: String,
        configured: String,
    },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Generation failed: {failure}")]
    Generation { failure: GenerationFailure },

    #[error("Cancelled")]
    Cancelled,
}

impl RagError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::InvalidArgument { .. }
            | RagError::Config { .. }
            | RagError::Corpus { .. }
            | RagError::Chunk(_) => ErrorKind::InvalidArgument,
            RagError::Embed(_) | RagError::ModelMismatch { .. } => ErrorKind::EmbedError,
            RagError::Index(_) => ErrorKind::IndexError,
            RagError::Generation { .. } => ErrorKind::GenerationError,
            RagError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Short machine-readable reason for generation failures ("auth", "quota", ...).
    pub fn generation_reason(&self) -> Option<&'static str> {
        match self {
            RagError::Generation { failure } => Some(failure.reason()),
            RagError::Cancelled => Some(GenerationFailure::Cancelled.reason()),
            _ => None,
        }
    }
}

impl From<GenerationFailure> for RagError {
    fn from(failure: GenerationFailure) -> Self {
        match failure {
            GenerationFailure::Cancelled => RagError::Cancelled,
            failure => RagError::Generation { failure },
        }
    }
}

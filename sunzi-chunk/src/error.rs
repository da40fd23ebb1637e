use thiserror::Error;

/// Errors produced while configuring a [`Chunker`](crate::Chunker)
#[derive(Error, Debug)]
pub enum ChunkError {
    /// A boundary pattern failed to compile
    #[error("Invalid boundary pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Numeric limits are inconsistent
    #[error("Invalid chunker configuration: {message}")]
    InvalidConfig { message: String },
}

impl ChunkError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChunkError>;

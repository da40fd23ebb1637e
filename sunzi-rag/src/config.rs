//! Pipeline configuration
//!
//! Settings come from an optional TOML file; every field has a default, so an
//! empty file (or none) is a valid configuration. Command-line flags are applied
//! on top by the binary. The generation credential is deliberately not part of
//! [`RagConfig`]: it is read from the process environment only.
//!
//! ```toml
//! corpus = "data/sun_tzu.txt"
//! collection = "sun_tzu_collection"
//! top_k = 3
//!
//! [chunking]
//! boundary = "line"
//! min_chars = 10
//!
//! [embedding]
//! provider = "fastembed"
//! model_name = "paraphrase-multilingual-MiniLM-L12-v2"
//!
//! [storage]
//! mode = "durable"
//! path = "sunzi_db"
//!
//! [generation]
//! model = "gemini-1.5-flash"
//! timeout_secs = 60
//! ```

use crate::error::{RagError, Result};
use crate::prompt::DEFAULT_SUBJECT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sunzi_chunk::ChunkerConfig;
use sunzi_embed::EmbedConfig;

pub const DEFAULT_CORPUS: &str = "data/sun_tzu.txt";
pub const DEFAULT_COLLECTION: &str = "sun_tzu_collection";
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Environment variables checked, in order, for the generation credential.
pub const API_KEY_VARS: &[&str] = &["GOOGLE_API_KEY", "SUNZI_API_KEY"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RagConfig {
    /// UTF-8 text, one teaching per line; used for ingestion and for rebuilding a
    /// missing collection
    pub corpus: PathBuf,
    pub collection: String,
    pub top_k: usize,
    /// Drop retrieved chunks whose normalized text repeats a higher-ranked one
    pub dedup: bool,
    pub chunking: ChunkerConfig,
    pub embedding: EmbedConfig,
    pub storage: StorageConfig,
    pub generation: GenerationConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            corpus: PathBuf::from(DEFAULT_CORPUS),
            collection: DEFAULT_COLLECTION.to_string(),
            top_k: DEFAULT_TOP_K,
            dedup: false,
            chunking: ChunkerConfig::default(),
            embedding: EmbedConfig::default(),
            storage: StorageConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// SQLite database under `path`; survives restarts
    #[default]
    Durable,
    /// Process memory only
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub mode: StorageKind,
    /// Directory holding the index database
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageKind::Durable,
            path: PathBuf::from("sunzi_db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub model: String,
    pub api_base: String,
    /// Applies to each generation call; nothing else in a query has a timeout
    pub timeout_secs: u64,
    /// What the assistant is an expert on, used in the prompt's role framing
    pub subject: String,
    /// Ask the backend which models exist and fall back if `model` is not offered
    pub discover_model: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GENERATION_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: 60,
            subject: DEFAULT_SUBJECT.to_string(),
            discover_model: false,
        }
    }
}

impl RagConfig {
    /// Parse a TOML document and validate the result.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RagConfig =
            toml::from_str(content).map_err(|e| RagError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            RagError::Config { message } => {
                RagError::config(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(RagError::config("collection name must not be empty"));
        }
        if self.top_k == 0 {
            return Err(RagError::config("top_k must be at least 1"));
        }
        if self.generation.timeout_secs == 0 {
            return Err(RagError::config("generation.timeout_secs must be positive"));
        }
        if self.generation.model.trim().is_empty() {
            return Err(RagError::config("generation.model must not be empty"));
        }
        self.chunking
            .validate()
            .map_err(|e| RagError::config(e.to_string()))?;
        self.embedding
            .validate()
            .map_err(|e| RagError::config(e.to_string()))?;
        Ok(())
    }
}

/// A generation credential. Its `Debug` output never shows the key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// First non-blank value of [`API_KEY_VARS`] according to `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        API_KEY_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .map(Self)
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

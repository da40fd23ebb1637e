//! # sunzi-rag
//!
//! Retrieval-augmented question answering over a fixed text corpus.
//!
//! ## Architecture
//!
//! The crate wires the other sunzi crates into a query pipeline:
//! - [`sunzi_chunk`] splits the corpus into chunks
//! - [`sunzi_embed`] turns chunks and questions into vectors
//! - [`sunzi_index`] stores the vectors and answers nearest-neighbour queries
//!
//! On top of those it adds:
//! - [`Ingestor`]: corpus → chunks → embeddings → atomic collection rebuild
//! - [`Retriever`]: question → top-k chunks
//! - [`PromptAssembler`]: chunks + question → grounded prompt
//! - [`Generator`] / [`GeminiGenerator`]: prompt → answer or a classified failure
//! - [`RagPipeline`]: the per-query state machine tying these together
//! - [`Components`]: builds all long-lived handles from a [`RagConfig`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use sunzi_rag::{ApiKey, Components, RagConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RagConfig::load_or_default(None)?;
//! let components = Components::init(config, ApiKey::from_env()).await?;
//!
//! components
//!     .ingestor()?
//!     .ensure(&components.config.collection, &components.config.corpus)
//!     .await?;
//!
//! let answer = components.pipeline()?.ask("How should I treat my enemy?").await?;
//! println!("{}", answer.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every failure maps onto one [`ErrorKind`]. Query failures are scoped to the
//! query and report the stage they happened in ([`QueryFailure`]); ingestion
//! failures abort the whole rebuild. Nothing is replaced with fallback text.

pub mod components;
pub mod config;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod pipeline;
pub mod prompt;
pub mod retriever;

pub use components::Components;
pub use config::{ApiKey, GenerationConfig, RagConfig, StorageConfig, StorageKind};
pub use error::{ErrorKind, RagError, Result};
pub use generator::{
    GeminiGenerator, GenerationFailure, GenerationOutcome, Generator, choose_model,
};
pub use ingest::{EnsureStatus, IngestReport, Ingestor, fingerprint};
pub use pipeline::{Answer, QueryFailure, QueryStage, RagPipeline};
pub use prompt::{Prompt, PromptAssembler};
pub use retriever::Retriever;

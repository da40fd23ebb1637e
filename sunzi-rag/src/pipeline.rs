//! Per-query state machine
//!
//! A question moves through
//! `Received → Embedding → Retrieving → Assembling → Generating` and ends in
//! `Answered` or `Failed`. Stages run in order, never re-enter, and a failure
//! reports the stage it happened in. Only the generation call can be cancelled;
//! cancellation never touches the index.

use crate::error::{ErrorKind, RagError};
use crate::generator::{GenerationFailure, Generator};
use crate::prompt::{Prompt, PromptAssembler};
use crate::retriever::Retriever;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use sunzi_index::RetrievalResult;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Received,
    Embedding,
    Retrieving,
    Assembling,
    Generating,
    Answered,
    Failed,
}

impl QueryStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryStage::Answered | QueryStage::Failed)
    }
}

impl std::fmt::Display for QueryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryStage::Received => "received",
            QueryStage::Embedding => "embedding",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Assembling => "assembling",
            QueryStage::Generating => "generating",
            QueryStage::Answered => "answered",
            QueryStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A generated answer together with the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub question: String,
    /// Model text, verbatim
    pub text: String,
    /// Retrieved chunks, best first
    pub context: RetrievalResult,
}

/// Why a query produced no answer.
#[derive(Debug, thiserror::Error)]
#[error("query failed while {stage}: {error}")]
pub struct QueryFailure {
    /// Stage that was running when the failure happened
    pub stage: QueryStage,
    #[source]
    pub error: RagError,
    /// Set once retrieval has succeeded, so a caller can retry generation
    /// without embedding and searching again
    pub retrieved: Option<RetrievalResult>,
}

impl QueryFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Forward-only stage tracking for one query.
#[derive(Debug)]
struct StageTracker {
    stage: QueryStage,
}

impl StageTracker {
    fn new(stage: QueryStage) -> Self {
        tracing::debug!(stage = %stage, "Query stage");
        Self { stage }
    }

    fn enter(&mut self, next: QueryStage) {
        debug_assert!(
            !self.stage.is_terminal() && next > self.stage,
            "illegal stage transition {} -> {}",
            self.stage,
            next
        );
        tracing::debug!(from = %self.stage, to = %next, "Query stage");
        self.stage = next;
    }

    fn fail(self, error: RagError, retrieved: Option<RetrievalResult>) -> QueryFailure {
        tracing::warn!(
            stage = %self.stage,
            kind = %error.kind(),
            "Query failed: {}",
            error
        );
        QueryFailure {
            stage: self.stage,
            error,
            retrieved,
        }
    }
}

/// Retriever, prompt assembler and generator wired to one collection.
#[derive(Clone)]
pub struct RagPipeline {
    retriever: Retriever,
    assembler: PromptAssembler,
    generator: Arc<dyn Generator>,
    collection: String,
    top_k: usize,
}

impl RagPipeline {
    pub fn new(
        retriever: Retriever,
        assembler: PromptAssembler,
        generator: Arc<dyn Generator>,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            assembler,
            generator,
            collection: collection.into(),
            top_k,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, QueryFailure> {
        self.ask_with_cancel(question, std::future::pending::<()>())
            .await
    }

    /// Answer `question`; if `cancel` completes while the model is generating,
    /// the query fails with [`ErrorKind::Cancelled`].
    pub async fn ask_with_cancel<C>(&self, question: &str, cancel: C) -> Result<Answer, QueryFailure>
    where
        C: Future<Output = ()> + Send,
    {
        let span = tracing::info_span!("query", collection = %self.collection);
        async move {
            let mut tracker = StageTracker::new(QueryStage::Received);
            let retrieved = self.retrieve_stages(&mut tracker, question).await;
            match retrieved {
                Ok(retrieved) => self.generate_stages(tracker, question, retrieved, cancel).await,
                Err(error) => Err(tracker.fail(error, None)),
            }
        }
        .instrument(span)
        .await
    }

    /// Run only the embedding and retrieval stages.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult, QueryFailure> {
        let span = tracing::info_span!("retrieve", collection = %self.collection);
        async move {
            let mut tracker = StageTracker::new(QueryStage::Received);
            self.retrieve_stages(&mut tracker, question)
                .await
                .map_err(|error| tracker.fail(error, None))
        }
        .instrument(span)
        .await
    }

    /// Assemble and generate from an earlier retrieval, typically one returned in
    /// [`QueryFailure::retrieved`].
    pub async fn answer_from<C>(
        &self,
        question: &str,
        retrieved: RetrievalResult,
        cancel: C,
    ) -> Result<Answer, QueryFailure>
    where
        C: Future<Output = ()> + Send,
    {
        let span = tracing::info_span!("answer", collection = %self.collection);
        async move {
            let tracker = StageTracker::new(QueryStage::Retrieving);
            self.generate_stages(tracker, question, retrieved, cancel)
                .await
        }
        .instrument(span)
        .await
    }

    /// Prompt for `question` over `retrieved`, without calling the model.
    pub fn prompt_for(&self, question: &str, retrieved: &RetrievalResult) -> Prompt {
        self.assembler.assemble(retrieved, question)
    }

    async fn retrieve_stages(
        &self,
        tracker: &mut StageTracker,
        question: &str,
    ) -> Result<RetrievalResult, RagError> {
        tracker.enter(QueryStage::Embedding);
        let vector = self.retriever.embed_query(question).await?;

        tracker.enter(QueryStage::Retrieving);
        let retrieved = self
            .retriever
            .search(&self.collection, &vector, self.top_k)
            .await?;
        tracing::debug!("Retrieved {} chunks", retrieved.len());
        Ok(retrieved)
    }

    async fn generate_stages<C>(
        &self,
        mut tracker: StageTracker,
        question: &str,
        retrieved: RetrievalResult,
        cancel: C,
    ) -> Result<Answer, QueryFailure>
    where
        C: Future<Output = ()> + Send,
    {
        tracker.enter(QueryStage::Assembling);
        let prompt = self.assembler.assemble(&retrieved, question);

        tracker.enter(QueryStage::Generating);
        let outcome = tokio::select! {
            outcome = self.generator.generate(&prompt) => outcome.into_result(),
            () = cancel => Err(GenerationFailure::Cancelled),
        };

        match outcome {
            Ok(text) => {
                tracker.enter(QueryStage::Answered);
                Ok(Answer {
                    question: question.to_string(),
                    text,
                    context: retrieved,
                })
            }
            Err(failure) => Err(tracker.fail(RagError::from(failure), Some(retrieved))),
        }
    }
}

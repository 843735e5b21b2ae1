//! Response Orchestrator
//!
//! Turns a user question into either an SQL query or, when the model declines,
//! an explanation with refined prompts. The flow is:
//!
//! 1. retrieve schema context and ask the model for SQL
//! 2. if the answer contains the refusal sentence, retrieve context again and
//!    ask the model to explain the failure and suggest better questions
//!
//! Core functions return `Result`; the `String` APIs render failures as fixed
//! apology messages and never fail.

use crate::error::{AssistantError, Result};
use crate::llm::{ChatMessage, ChatModel};
use crate::prompts::{Prompt, REFUSAL_SENTENCE};
use crate::schema_rag::{retrieve_context, Retriever, SchemaContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_APOLOGY: &str =
    "An error occurred while processing your request. Please try again later.";
pub const FALLBACK_APOLOGY: &str =
    "An error occurred while processing the fallback logic. Please try again later.";

/// Decides whether a model answer is a refusal to produce SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefusalDetector {
    sentence: String,
}

impl RefusalDetector {
    pub fn new(sentence: impl Into<String>) -> Self {
        Self { sentence: sentence.into() }
    }

    /// Exact, case-sensitive substring match.
    pub fn is_refusal(&self, response: &str) -> bool {
        response.contains(&self.sentence)
    }

    pub fn sentence(&self) -> &str {
        &self.sentence
    }
}

impl Default for RefusalDetector {
    fn default() -> Self {
        Self::new(REFUSAL_SENTENCE)
    }
}

/// Which part of the dispatch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Primary,
    Retrieval,
    Fallback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Primary => write!(f, "primary pass"),
            Stage::Retrieval => write!(f, "fallback context retrieval"),
            Stage::Fallback => write!(f, "fallback pass"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: AssistantError,
}

impl StageError {
    fn new(stage: Stage, source: AssistantError) -> Self {
        Self { stage, source }
    }

    /// User-facing text for this failure.
    pub fn apology(&self) -> &'static str {
        match self.stage {
            Stage::Fallback => FALLBACK_APOLOGY,
            Stage::Primary | Stage::Retrieval => REQUEST_APOLOGY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// The first answer, returned verbatim
    Direct,
    /// Explanation and refined prompts after a refusal
    Refined,
    /// Apology text after a failed pass
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub request_id: Uuid,
    pub text: String,
    pub kind: ResponseKind,
    pub completed_at: DateTime<Utc>,
}

/// First pass: ask for SQL grounded in the retrieved schema. The model is
/// told to answer with `refusal_sentence` when the schema cannot help.
pub async fn try_initial_response(
    query: &str,
    llm: &dyn ChatModel,
    retriever: &dyn Retriever,
    k: usize,
    refusal_sentence: &str,
) -> Result<String> {
    let context = retrieve_context(retriever, query, k).await?;
    let prompt = Prompt::generation(query, &context, refusal_sentence);
    let response = llm.complete(&prompt.to_messages()).await?;
    non_empty(response)
}

/// First pass with failures rendered as [`REQUEST_APOLOGY`].
pub async fn generate_initial_response(
    query: &str,
    llm: &dyn ChatModel,
    retriever: &dyn Retriever,
    k: usize,
) -> String {
    match try_initial_response(query, llm, retriever, k, REFUSAL_SENTENCE).await {
        Ok(text) => text,
        Err(e) => {
            error!("Error generating response: {}", e);
            REQUEST_APOLOGY.to_string()
        }
    }
}

/// Fallback pass: explain the refusal and suggest better questions, no SQL.
pub async fn try_fallback(
    query: &str,
    llm: &dyn ChatModel,
    context: &SchemaContext,
    human_message: ChatMessage,
) -> Result<String> {
    info!("Triggering fallback logic");
    let prompt = Prompt::refinement(query, context, human_message);
    let response = llm.complete(&prompt.to_messages()).await?;
    let text = non_empty(response)?;
    info!("Refined response generated");
    Ok(text)
}

/// Fallback pass with failures rendered as [`FALLBACK_APOLOGY`].
pub async fn trigger_fallback_logic(
    query: &str,
    llm: &dyn ChatModel,
    context: &SchemaContext,
    human_message: ChatMessage,
) -> String {
    match try_fallback(query, llm, context, human_message).await {
        Ok(text) => text,
        Err(e) => {
            error!("Error triggering fallback logic: {}", e);
            FALLBACK_APOLOGY.to_string()
        }
    }
}

/// Run the full two-step flow.
pub async fn dispatch(
    query: &str,
    llm: &dyn ChatModel,
    retriever: &dyn Retriever,
    k: usize,
    detector: &RefusalDetector,
) -> std::result::Result<(String, ResponseKind), StageError> {
    let primary = try_initial_response(query, llm, retriever, k, detector.sentence())
        .await
        .map_err(|e| StageError::new(Stage::Primary, e))?;

    if !detector.is_refusal(&primary) {
        return Ok((primary, ResponseKind::Direct));
    }

    warn!("Fallback triggered: model declined to generate SQL");
    // Context is fetched again rather than reused from the first pass.
    let context = retrieve_context(retriever, query, k)
        .await
        .map_err(|e| StageError::new(Stage::Retrieval, e))?;

    let refined = try_fallback(query, llm, &context, ChatMessage::human(query))
        .await
        .map_err(|e| StageError::new(Stage::Fallback, e))?;

    Ok((refined, ResponseKind::Refined))
}

/// Answer a question with the default refusal sentence. Never fails.
pub async fn get_response(query: &str, llm: &dyn ChatModel, retriever: &dyn Retriever, k: usize) -> String {
    let span = info_span!("get_response", request_id = %Uuid::new_v4(), model = llm.model_name());
    async {
        match dispatch(query, llm, retriever, k, &RefusalDetector::default()).await {
            Ok((text, _)) => text,
            Err(e) => {
                error!("Error in get_response: {}", e);
                e.apology().to_string()
            }
        }
    }
    .instrument(span)
    .await
}

fn non_empty(response: String) -> Result<String> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(AssistantError::Llm("Model returned an empty response".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Long-lived handle for hosts: shared clients plus retrieval settings.
#[derive(Clone)]
pub struct ResponseHandler {
    llm: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    detector: RefusalDetector,
    top_k: usize,
}

impl ResponseHandler {
    pub fn new(llm: Arc<dyn ChatModel>, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        Self {
            llm,
            retriever,
            detector: RefusalDetector::default(),
            top_k,
        }
    }

    pub fn with_detector(mut self, detector: RefusalDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer with the configured `top_k`.
    pub async fn respond(&self, query: &str) -> AssistantResponse {
        self.respond_with_k(query, self.top_k).await
    }

    pub async fn respond_with_k(&self, query: &str, k: usize) -> AssistantResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("get_response", request_id = %request_id, model = self.llm.model_name());

        let (text, kind) = async {
            match dispatch(query, self.llm.as_ref(), self.retriever.as_ref(), k, &self.detector).await {
                Ok(answer) => answer,
                Err(e) => {
                    error!("Error in get_response: {}", e);
                    (e.apology().to_string(), ResponseKind::Failed)
                }
            }
        }
        .instrument(span)
        .await;

        AssistantResponse {
            request_id,
            text,
            kind,
            completed_at: Utc::now(),
        }
    }

    /// String-only variant of [`ResponseHandler::respond`].
    pub async fn get_response(&self, query: &str) -> String {
        self.respond(query).await.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_detector_exact_substring() {
        let detector = RefusalDetector::default();
        assert!(detector.is_refusal(REFUSAL_SENTENCE));
        assert!(detector.is_refusal(&format!("Sorry. {} Try again.", REFUSAL_SENTENCE)));
        assert!(!detector.is_refusal("I can't generate a SQL query for this request."));
        assert!(!detector.is_refusal(&REFUSAL_SENTENCE.to_lowercase()));
        assert!(!detector.is_refusal("SELECT * FROM customers"));
    }

    #[test]
    fn test_custom_refusal_sentence() {
        let detector = RefusalDetector::new("NO_SQL");
        assert!(detector.is_refusal("NO_SQL"));
        assert!(!detector.is_refusal(REFUSAL_SENTENCE));
        assert_eq!(detector.sentence(), "NO_SQL");
    }

    #[test]
    fn test_stage_apology() {
        let err = |stage| StageError::new(stage, AssistantError::Llm("boom".to_string()));
        assert_eq!(err(Stage::Primary).apology(), REQUEST_APOLOGY);
        assert_eq!(err(Stage::Retrieval).apology(), REQUEST_APOLOGY);
        assert_eq!(err(Stage::Fallback).apology(), FALLBACK_APOLOGY);
        assert!(err(Stage::Fallback).to_string().contains("fallback pass failed"));
    }

    #[test]
    fn test_response_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ResponseKind::Direct).unwrap(), "direct");
        assert_eq!(serde_json::to_value(ResponseKind::Refined).unwrap(), "refined");
        assert_eq!(serde_json::to_value(ResponseKind::Failed).unwrap(), "failed");
    }

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty("  SELECT 1\n".to_string()).unwrap(), "SELECT 1");
        assert!(non_empty(" \n ".to_string()).is_err());
    }
}

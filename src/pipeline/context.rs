//! The per-request [`CheckContext`] handed to every detector.
//!
//! The context is **immutable** from a detector's perspective.  The one
//! exception is the normalized-text slot, which the orchestrator fills
//! exactly once — before any detector runs — through a [`OnceLock`].

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::normalize::NormalizedText;

/// Metadata key under which RAG documents travel (JSON array of strings).
pub const META_RAG_DOCUMENTS: &str = "rag_documents";

/// Metadata key under which the grounding context travels (JSON string).
pub const META_GROUNDING_CONTEXT: &str = "grounding_context";

// ── HistoryMessage ─────────────────────────────────────────────────────

/// A prior message in the conversation, oldest first.
///
/// Mirrors the standard `{role, content}` shape used by LLM API providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Role identifier — typically `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Textual content of the message.
    pub content: String,
}

impl HistoryMessage {
    /// Create a new message.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Shorthand for a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Shorthand for an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

// ── CheckContext ───────────────────────────────────────────────────────

/// Immutable per-request record flowing through the pipeline.
#[derive(Debug)]
pub struct CheckContext {
    request_id: String,
    input: String,
    normalized: OnceLock<NormalizedText>,
    user_id: Option<String>,
    session_id: Option<String>,
    history: Vec<HistoryMessage>,
    metadata: HashMap<String, serde_json::Value>,
    timestamp: DateTime<Utc>,
    cancellation: CancellationToken,
}

impl CheckContext {
    /// Create a context for the given input with a fresh request id.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self::builder().input(input).build()
    }

    /// Start building a context.
    #[must_use]
    pub fn builder() -> CheckContextBuilder {
        CheckContextBuilder::default()
    }

    /// Unique request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The original, untouched input text.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// The normalized text, if the normalizer has run.
    #[must_use]
    pub fn normalized(&self) -> Option<&NormalizedText> {
        self.normalized.get()
    }

    /// The normalized text when available, the raw input otherwise.
    #[must_use]
    pub fn text(&self) -> &str {
        self.normalized
            .get()
            .map_or(self.input.as_str(), |n| n.text.as_str())
    }

    /// Attach the normalizer's result.  Only the first call takes effect;
    /// returns `false` when the slot was already filled.
    pub fn set_normalized(&self, normalized: NormalizedText) -> bool {
        self.normalized.set(normalized).is_ok()
    }

    /// The user this request belongs to, if known.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The session this request belongs to, if known.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Prior conversation messages, oldest first.
    #[must_use]
    pub fn history(&self) -> &[HistoryMessage] {
        &self.history
    }

    /// Open-ended request metadata (grounding context, RAG documents,
    /// tool-call descriptors, …).
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// A single metadata value.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// When the context was created.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The cancellation signal for this request.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the caller has cancelled this request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

// ── CheckContextBuilder ────────────────────────────────────────────────

/// Builder for [`CheckContext`].
#[derive(Debug, Default)]
pub struct CheckContextBuilder {
    request_id: Option<String>,
    input: String,
    user_id: Option<String>,
    session_id: Option<String>,
    history: Vec<HistoryMessage>,
    metadata: HashMap<String, serde_json::Value>,
    cancellation: Option<CancellationToken>,
}

impl CheckContextBuilder {
    /// Set the request id (a fresh UUID is generated when absent).
    #[must_use]
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Set the input text.
    #[must_use]
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    /// Set the user identifier.
    #[must_use]
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Set the session identifier.
    #[must_use]
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Attach the conversation history, oldest first.
    #[must_use]
    pub fn history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach RAG documents under [`META_RAG_DOCUMENTS`].
    #[must_use]
    pub fn rag_documents(self, documents: Vec<String>) -> Self {
        self.metadata(META_RAG_DOCUMENTS, serde_json::json!(documents))
    }

    /// Attach a grounding context under [`META_GROUNDING_CONTEXT`].
    #[must_use]
    pub fn grounding_context(self, grounding: impl Into<String>) -> Self {
        self.metadata(META_GROUNDING_CONTEXT, serde_json::json!(grounding.into()))
    }

    /// Thread a cancellation signal through the request.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Build the context.
    #[must_use]
    pub fn build(self) -> CheckContext {
        CheckContext {
            request_id: self
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            input: self.input,
            normalized: OnceLock::new(),
            user_id: self.user_id,
            session_id: self.session_id,
            history: self.history,
            metadata: self.metadata,
            timestamp: Utc::now(),
            cancellation: self.cancellation.unwrap_or_default(),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_defaults() {
        let ctx = CheckContext::new("hello");
        assert_eq!(ctx.input(), "hello");
        assert!(!ctx.request_id().is_empty());
        assert!(ctx.normalized().is_none());
        assert_eq!(ctx.text(), "hello");
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn normalized_set_at_most_once() {
        let ctx = CheckContext::new("ра\u{200B}w");
        let first = NormalizedText {
            text: "paw".into(),
            ..NormalizedText::default()
        };
        assert!(ctx.set_normalized(first));
        assert_eq!(ctx.text(), "paw");

        let second = NormalizedText {
            text: "other".into(),
            ..NormalizedText::default()
        };
        assert!(!ctx.set_normalized(second));
        assert_eq!(ctx.text(), "paw", "second set must not take effect");
    }

    #[test]
    fn metadata_helpers() {
        let ctx = CheckContext::builder()
            .input("q")
            .rag_documents(vec!["doc one".into()])
            .grounding_context("the sky is blue")
            .build();
        assert!(ctx.get_metadata(META_RAG_DOCUMENTS).is_some());
        assert_eq!(
            ctx.get_metadata(META_GROUNDING_CONTEXT).unwrap(),
            &serde_json::json!("the sky is blue"),
        );
    }

    #[test]
    fn explicit_request_id_preserved() {
        let ctx = CheckContext::builder().request_id("req-42").input("x").build();
        assert_eq!(ctx.request_id(), "req-42");
    }

    #[test]
    fn cancellation_propagates() {
        let token = CancellationToken::new();
        let ctx = CheckContext::builder()
            .input("x")
            .cancellation(token.clone())
            .build();
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}

//! Shared data types for the query pipeline and the HTTP wire contract.

use serde::{Deserialize, Serialize};

/// The generation model size class selected by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Simple,
    Complex,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Simple => "simple",
            Tier::Complex => "complex",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of text a segment was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Prose,
    Table,
}

impl Default for SegmentKind {
    fn default() -> Self {
        SegmentKind::Prose
    }
}

/// A unit of retrievable text with a precomputed embedding and source
/// metadata. Immutable after index load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub document: String,
    #[serde(default)]
    pub page: Option<u32>,
    pub text: String,
    #[serde(default)]
    pub kind: SegmentKind,
    /// Unit-normalized embedding vector.
    pub embedding: Vec<f32>,
}

/// Role of a chat message sent to the generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Token usage reported by the generation provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: usize,
    pub output: usize,
}

/// `POST /query` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Metadata attached to every completed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub model_used: String,
    pub classification: Tier,
    pub tokens: TokenUsage,
    pub latency_ms: u64,
    pub chunks_retrieved: usize,
    #[serde(default)]
    pub evaluator_flags: Vec<crate::evaluator::EvaluatorFlag>,
    /// True when the answer came from the simple tier after the routed
    /// complex tier failed, as opposed to a router-selected tier.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// A retrieved source reference returned alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f32>,
}

/// `POST /query` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub metadata: QueryMetadata,
    pub sources: Vec<SourceInfo>,
    pub conversation_id: String,
}

/// An event emitted by the streaming coordinator.
///
/// Ordering invariant: zero or more `Token` events followed by exactly one
/// terminal event (`Done` or `Error`); nothing after the terminal one.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Done {
        metadata: QueryMetadata,
        sources: Vec<SourceInfo>,
        conversation_id: String,
    },
    Error(String),
}

impl StreamEvent {
    /// Serialize to the SSE wire payload shape.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            StreamEvent::Token(text) => serde_json::json!({ "token": text }),
            StreamEvent::Done {
                metadata,
                sources,
                conversation_id,
            } => serde_json::json!({
                "done": true,
                "metadata": metadata,
                "sources": sources,
                "conversation_id": conversation_id,
            }),
            StreamEvent::Error(message) => serde_json::json!({ "error": message }),
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error(_))
    }
}

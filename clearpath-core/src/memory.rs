//! Conversation store and follow-up query rewriting.
//!
//! Keeps a bounded window of recent turns per conversation id, detects
//! anaphoric follow-up questions, and rewrites them into standalone form
//! via one call to the lightweight generation tier. Rewrite failures fall
//! back to the original query and never block the pipeline.
//!
//! Concurrency: the outer map is guarded by an `RwLock`; each conversation
//! owns its own `Mutex` so appends and lookups are serialized per key
//! while distinct conversations proceed without contention.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::MemoryConfig;
use crate::provider::{ChatRequest, LlmProvider};
use crate::types::ChatMessage;

/// Stored assistant text is truncated to this many characters for token
/// economy; the full answer was already delivered to the client.
const STORED_ANSWER_CHARS: usize = 200;

/// Queries shorter than this many words are treated as follow-ups when
/// history exists.
const SHORT_QUERY_WORDS: usize = 5;

/// Rewrites longer than this are considered runaway output and discarded.
const MAX_REWRITE_CHARS: usize = 500;

static PRONOUN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(it|that|they|this|its|their|them|those|these|he|she)\b")
        .expect("pronoun pattern is valid")
});

const REFERRING_PHRASES: &[&str] = &[
    "about that",
    "from before",
    "you mentioned",
    "you said",
    "previously",
    "as you said",
    "regarding that",
    "the same",
    "more about",
    "tell me more",
    "go on",
    "continue",
    "what about",
    "and also",
    "follow up",
    "following up",
];

const REWRITE_SYSTEM_PROMPT: &str =
    "You rewrite user questions to be standalone. Output ONLY the rewritten question.";

/// A completed conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub user_text: String,
    /// Truncated to [`STORED_ANSWER_CHARS`] on append.
    pub assistant_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Keyed in-process store of recent conversation turns.
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Arc<Mutex<VecDeque<Turn>>>>>,
    max_turns: usize,
    history_window: usize,
}

impl ConversationStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_turns: config.max_turns,
            history_window: config.history_window,
        }
    }

    /// Get or create the per-conversation turn queue.
    async fn entry(&self, conversation_id: &str) -> Arc<Mutex<VecDeque<Turn>>> {
        {
            let map = self.conversations.read().await;
            if let Some(entry) = map.get(conversation_id) {
                return Arc::clone(entry);
            }
        }
        let mut map = self.conversations.write().await;
        Arc::clone(
            map.entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }

    /// Append a completed turn, truncating the stored assistant text and
    /// evicting the oldest turn beyond the retention cap.
    pub async fn append(&self, conversation_id: &str, user_text: &str, assistant_text: &str) {
        let stored_answer = if assistant_text.chars().count() > STORED_ANSWER_CHARS {
            let truncated: String = assistant_text.chars().take(STORED_ANSWER_CHARS).collect();
            format!("{truncated}...")
        } else {
            assistant_text.to_string()
        };

        let entry = self.entry(conversation_id).await;
        let mut turns = entry.lock().await;
        turns.push_back(Turn {
            user_text: user_text.to_string(),
            assistant_text: stored_answer,
            timestamp: Utc::now(),
        });
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    /// The most recent turns within the history window, oldest first.
    pub async fn history(&self, conversation_id: &str) -> Vec<Turn> {
        let map = self.conversations.read().await;
        let Some(entry) = map.get(conversation_id) else {
            return Vec::new();
        };
        let entry = Arc::clone(entry);
        drop(map);

        let turns = entry.lock().await;
        let skip = turns.len().saturating_sub(self.history_window);
        turns.iter().skip(skip).cloned().collect()
    }

    pub async fn has_history(&self, conversation_id: &str) -> bool {
        let map = self.conversations.read().await;
        match map.get(conversation_id) {
            Some(entry) => !entry.lock().await.is_empty(),
            None => false,
        }
    }

    /// Number of retained turns (diagnostics and tests).
    pub async fn turn_count(&self, conversation_id: &str) -> usize {
        let map = self.conversations.read().await;
        match map.get(conversation_id) {
            Some(entry) => entry.lock().await.len(),
            None => 0,
        }
    }

    /// Detect whether a query depends on conversation context: a pronoun,
    /// a very short question, or a referring phrase. Never fires without
    /// history.
    pub async fn is_followup(&self, query: &str, conversation_id: &str) -> bool {
        if !self.has_history(conversation_id).await {
            return false;
        }

        let query_lower = query.trim().to_lowercase();

        if PRONOUN_PATTERN.is_match(&query_lower) {
            return true;
        }
        if query_lower.split_whitespace().count() < SHORT_QUERY_WORDS {
            return true;
        }
        REFERRING_PHRASES
            .iter()
            .any(|phrase| query_lower.contains(phrase))
    }

    /// Build the rewrite request message pair from recent history.
    fn build_rewrite_messages(&self, query: &str, history: &[Turn]) -> Vec<ChatMessage> {
        let mut lines = Vec::with_capacity(history.len() * 2);
        for turn in history {
            lines.push(format!("User: {}", turn.user_text));
            lines.push(format!("Assistant: {}", turn.assistant_text));
        }
        let prompt = format!(
            "Given this conversation history:\n{}\n\n\
             Rewrite the following question to be standalone and self-contained, \
             incorporating context from the conversation. Output ONLY the rewritten \
             question, nothing else.\n\nQuestion: {query}",
            lines.join("\n"),
        );

        vec![
            ChatMessage::system(REWRITE_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ]
    }

    /// Rewrite a follow-up query into standalone form, or return the
    /// original query on any failure. The original text is what gets
    /// displayed and stored; the rewrite is only used for routing and
    /// retrieval.
    pub async fn maybe_rewrite(
        &self,
        query: &str,
        conversation_id: &str,
        llm: &dyn LlmProvider,
        model: &str,
        max_tokens: u32,
    ) -> String {
        if !self.is_followup(query, conversation_id).await {
            return query.to_string();
        }

        let history = self.history(conversation_id).await;
        let request = ChatRequest {
            model: model.to_string(),
            messages: self.build_rewrite_messages(query, &history),
            max_tokens,
            temperature: 0.3,
        };

        match llm.complete(request).await {
            Ok(response) => {
                let rewritten = response.content.trim().to_string();
                if rewritten.is_empty() || rewritten.chars().count() > MAX_REWRITE_CHARS {
                    return query.to_string();
                }
                debug!(original = query, rewritten = %rewritten, "Rewrote follow-up query");
                rewritten
            }
            Err(e) => {
                warn!(error = %e, "Query rewrite failed, using original query");
                query.to_string()
            }
        }
    }
}

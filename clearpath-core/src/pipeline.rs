//! Query pipeline: routing, retrieval, generation, evaluation.
//!
//! One `QueryPipeline` is shared by all requests. Each request moves
//! through a fixed phase sequence; the streaming path reports tokens as
//! they arrive and ends with exactly one terminal event, except on
//! cancellation where the stream simply stops.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ClearpathError, LlmError};
use crate::evaluator;
use crate::index::CorpusIndex;
use crate::memory::ConversationStore;
use crate::prompt;
use crate::provider::{ChatRequest, LlmProvider};
use crate::retriever::Retriever;
use crate::router::{self, GREETING_RESPONSE};
use crate::types::{
    QueryMetadata, QueryRequest, QueryResponse, SourceInfo, StreamEvent, Tier, TokenUsage,
};

/// Lifecycle of a single request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Pending,
    Retrieving,
    Generating,
    Evaluating,
    Completed,
    Aborted,
    Failed,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Evaluating => "evaluating",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything assembled before generation starts.
struct PreparedQuery {
    conversation_id: String,
    effective_query: String,
    tier: Tier,
    model: String,
    request: ChatRequest,
    sources: Vec<SourceInfo>,
    segment_indices: Vec<usize>,
}

pub struct QueryPipeline {
    config: Arc<AppConfig>,
    index: Arc<CorpusIndex>,
    store: Arc<ConversationStore>,
    embedder: Arc<dyn crate::embedding::EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    retriever: Retriever,
}

impl QueryPipeline {
    pub fn new(
        config: Arc<AppConfig>,
        index: Arc<CorpusIndex>,
        store: Arc<ConversationStore>,
        embedder: Arc<dyn crate::embedding::EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        let retriever = Retriever::new(Arc::clone(&index), config.retrieval.clone());
        Self { config, index, store, embedder, llm, retriever }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn segment_count(&self) -> usize {
        self.index.len()
    }

    fn new_conversation_id() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("conv_{}", &id[..12])
    }

    fn resolve_conversation_id(request: &QueryRequest) -> String {
        request
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(Self::new_conversation_id)
    }

    fn set_phase(phase: &mut RequestPhase, next: RequestPhase, conversation_id: &str) {
        debug!(conversation_id, from = %phase, to = %next, "Phase transition");
        *phase = next;
    }

    fn greeting_response(&self, conversation_id: String, started: Instant) -> QueryResponse {
        QueryResponse {
            answer: GREETING_RESPONSE.to_string(),
            metadata: QueryMetadata {
                model_used: "none".to_string(),
                classification: Tier::Simple,
                tokens: TokenUsage::default(),
                latency_ms: started.elapsed().as_millis() as u64,
                chunks_retrieved: 0,
                evaluator_flags: Vec::new(),
                fallback: false,
            },
            sources: Vec::new(),
            conversation_id,
        }
    }

    /// Rewrite, route, retrieve, and assemble the prompt. Everything up to
    /// but not including the generation call.
    async fn prepare(
        &self,
        request: &QueryRequest,
        conversation_id: &str,
    ) -> Result<PreparedQuery, ClearpathError> {
        let effective_query = self
            .store
            .maybe_rewrite(
                request.question.trim(),
                conversation_id,
                self.llm.as_ref(),
                &self.config.llm.simple_model,
                self.config.generation.rewrite_max_tokens,
            )
            .await;

        let score = router::classify(&effective_query);
        let tier = score.tier;
        debug!(
            conversation_id,
            tier = %tier,
            total = score.total,
            "Routed query"
        );

        let embedding = self.embedder.embed(&effective_query).await?;
        let hits = self.retriever.retrieve(&embedding);
        let segment_indices: Vec<usize> = hits.iter().map(|h| h.index).collect();
        let segments = self.retriever.resolve(&hits);

        let sources = hits
            .iter()
            .zip(&segments)
            .map(|(hit, segment)| SourceInfo {
                document: segment.document.clone(),
                page: segment.page,
                relevance_score: Some(hit.score),
            })
            .collect();

        let history = self.store.history(conversation_id).await;
        let assembled = prompt::build_messages(&effective_query, &segments, &history)?;

        let model = self.config.llm.model_for(tier).to_string();
        let max_tokens = self.config.generation.max_tokens_for(tier);

        Ok(PreparedQuery {
            conversation_id: conversation_id.to_string(),
            effective_query,
            tier,
            model: model.clone(),
            request: ChatRequest {
                model,
                messages: assembled.messages,
                max_tokens,
                temperature: self.config.generation.temperature,
            },
            sources,
            segment_indices,
        })
    }

    fn resolve_segments(&self, indices: &[usize]) -> Vec<&crate::types::Segment> {
        indices.iter().filter_map(|&i| self.index.get(i)).collect()
    }

    /// Downgrade a prepared complex-tier request to the simple tier for a
    /// fallback attempt.
    fn downgrade(&self, prepared: &PreparedQuery) -> ChatRequest {
        ChatRequest {
            model: self.config.llm.simple_model.clone(),
            max_tokens: self.config.generation.simple_max_tokens,
            ..prepared.request.clone()
        }
    }

    fn log_completed(&self, prepared: &PreparedQuery, metadata: &QueryMetadata, question: &str) {
        info!(
            conversation_id = %prepared.conversation_id,
            question_chars = question.len(),
            rewritten = prepared.effective_query != question,
            classification = %metadata.classification,
            model_used = %metadata.model_used,
            input_tokens = metadata.tokens.input,
            output_tokens = metadata.tokens.output,
            latency_ms = metadata.latency_ms,
            chunks_retrieved = metadata.chunks_retrieved,
            evaluator_flags = ?metadata.evaluator_flags,
            fallback = metadata.fallback,
            "query_processed"
        );
    }

    /// Answer a query synchronously. Greetings short-circuit generation;
    /// a failed complex-tier call falls back to the simple tier once.
    pub async fn answer(&self, request: QueryRequest) -> Result<QueryResponse, ClearpathError> {
        let started = Instant::now();
        let conversation_id = Self::resolve_conversation_id(&request);
        let question = request.question.trim().to_string();

        if router::is_greeting(&question) {
            let response = self.greeting_response(conversation_id.clone(), started);
            self.store.append(&conversation_id, &question, &response.answer).await;
            info!(%conversation_id, "query_processed_greeting");
            return Ok(response);
        }

        let mut phase = RequestPhase::Pending;
        Self::set_phase(&mut phase, RequestPhase::Retrieving, &conversation_id);
        let prepared = self.prepare(&request, &conversation_id).await?;

        Self::set_phase(&mut phase, RequestPhase::Generating, &conversation_id);
        let mut model_used = prepared.model.clone();
        let mut fallback = false;
        let response = match self.llm.complete(prepared.request.clone()).await {
            Ok(response) => response,
            Err(e) if e.is_retryable() && prepared.tier == Tier::Complex => {
                warn!(%conversation_id, error = %e, "Complex tier failed, falling back to simple");
                fallback = true;
                model_used = self.config.llm.simple_model.clone();
                self.llm.complete(self.downgrade(&prepared)).await?
            }
            Err(e) => {
                Self::set_phase(&mut phase, RequestPhase::Failed, &conversation_id);
                return Err(e.into());
            }
        };

        Self::set_phase(&mut phase, RequestPhase::Evaluating, &conversation_id);
        let segments = self.resolve_segments(&prepared.segment_indices);
        let flags = evaluator::evaluate(&response.content, &segments);

        self.store.append(&conversation_id, &question, &response.content).await;

        let metadata = QueryMetadata {
            model_used,
            classification: prepared.tier,
            tokens: response.usage,
            latency_ms: started.elapsed().as_millis() as u64,
            chunks_retrieved: prepared.segment_indices.len(),
            evaluator_flags: flags,
            fallback,
        };
        Self::set_phase(&mut phase, RequestPhase::Completed, &conversation_id);
        self.log_completed(&prepared, &metadata, &question);

        Ok(QueryResponse {
            answer: response.content,
            metadata,
            sources: prepared.sources,
            conversation_id,
        })
    }

    /// Answer a query as a stream of events. The returned receiver yields
    /// zero or more `Token` events and then one terminal event, except on
    /// cancellation where the stream ends without a terminal event and the
    /// turn is not recorded.
    pub fn answer_streaming(
        self: &Arc<Self>,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (events, rx) = mpsc::channel(64);
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_streaming(request, cancel, events).await;
        });
        rx
    }

    async fn run_streaming(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
        events: mpsc::Sender<StreamEvent>,
    ) {
        let started = Instant::now();
        let conversation_id = Self::resolve_conversation_id(&request);
        let question = request.question.trim().to_string();
        let mut phase = RequestPhase::Pending;

        if router::is_greeting(&question) {
            let response = self.greeting_response(conversation_id.clone(), started);
            self.store.append(&conversation_id, &question, &response.answer).await;
            let _ = events.send(StreamEvent::Token(response.answer)).await;
            let _ = events
                .send(StreamEvent::Done {
                    metadata: response.metadata,
                    sources: response.sources,
                    conversation_id,
                })
                .await;
            return;
        }

        Self::set_phase(&mut phase, RequestPhase::Retrieving, &conversation_id);
        let prepared = match self.prepare(&request, &conversation_id).await {
            Ok(prepared) => prepared,
            Err(e) => {
                Self::set_phase(&mut phase, RequestPhase::Failed, &conversation_id);
                warn!(%conversation_id, error = %e, "Streaming request failed before generation");
                let _ = events.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        };

        Self::set_phase(&mut phase, RequestPhase::Generating, &conversation_id);
        let mut model_used = prepared.model.clone();
        let mut fallback = false;

        let (mut answer, mut result) = self
            .stream_attempt(prepared.request.clone(), &events, &cancel)
            .await;

        // One downgrade retry, only if the complex tier failed before any
        // token reached the client.
        if let Err(e) = &result {
            if answer.is_empty()
                && e.is_retryable()
                && prepared.tier == Tier::Complex
                && !cancel.is_cancelled()
            {
                warn!(%conversation_id, error = %e, "Complex tier failed, falling back to simple");
                fallback = true;
                model_used = self.config.llm.simple_model.clone();
                (answer, result) = self
                    .stream_attempt(self.downgrade(&prepared), &events, &cancel)
                    .await;
            }
        }

        let usage = match result {
            Ok(usage) => usage,
            Err(LlmError::Cancelled) => {
                // Client went away: stop silently, record nothing.
                Self::set_phase(&mut phase, RequestPhase::Aborted, &conversation_id);
                info!(%conversation_id, "Streaming request aborted");
                return;
            }
            Err(e) => {
                Self::set_phase(&mut phase, RequestPhase::Failed, &conversation_id);
                warn!(%conversation_id, error = %e, "Streaming generation failed");
                let message = if answer.is_empty() {
                    format!("{e}. No answer was produced; retry via POST /query.")
                } else {
                    format!("{e}. The answer above is incomplete.")
                };
                let _ = events.send(StreamEvent::Error(message)).await;
                return;
            }
        };

        Self::set_phase(&mut phase, RequestPhase::Evaluating, &conversation_id);
        let segments = self.resolve_segments(&prepared.segment_indices);
        let flags = evaluator::evaluate(&answer, &segments);

        self.store.append(&conversation_id, &question, &answer).await;

        let metadata = QueryMetadata {
            model_used,
            classification: prepared.tier,
            tokens: usage,
            latency_ms: started.elapsed().as_millis() as u64,
            chunks_retrieved: prepared.segment_indices.len(),
            evaluator_flags: flags,
            fallback,
        };
        Self::set_phase(&mut phase, RequestPhase::Completed, &conversation_id);
        self.log_completed(&prepared, &metadata, &question);

        let _ = events
            .send(StreamEvent::Done {
                metadata,
                sources: prepared.sources,
                conversation_id,
            })
            .await;
    }

    /// Run one streaming generation attempt, forwarding tokens to the
    /// event channel. Returns the text forwarded so far and the provider
    /// outcome.
    async fn stream_attempt(
        &self,
        request: ChatRequest,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> (String, Result<TokenUsage, LlmError>) {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let llm = Arc::clone(&self.llm);
        let provider_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { llm.complete_streaming(request, tx, provider_cancel).await });

        let mut answer = String::new();
        while let Some(token) = rx.recv().await {
            answer.push_str(&token);
            if events.send(StreamEvent::Token(token)).await.is_err() {
                // Event consumer dropped; tell the provider to stop.
                cancel.cancel();
                break;
            }
        }

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(LlmError::Streaming { message: e.to_string() }),
        };
        (answer, result)
    }
}

//! Chat completion provider for OpenAI-compatible APIs.
//!
//! One provider serves both generation tiers; the model name travels in
//! the request. Transient upstream failures (rate limits, overload,
//! timeouts) are retried with exponential backoff before surfacing.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::sse::SseParser;
use crate::types::{ChatMessage, TokenUsage};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Chat completion backend. Streaming sends tokens through the channel as
/// they arrive and returns usage once the stream finishes.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<TokenUsage, LlmError>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::ApiRequest { message: e.to_string() })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.request_timeout_secs,
        })
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        let mut last_error = LlmError::ApiRequest { message: "no attempts made".to_string() };
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let wait = match &last_error {
                    LlmError::RateLimited { retry_after_secs: Some(secs) } => *secs,
                    _ => BACKOFF_BASE_SECS << (attempt - 1),
                };
                warn!(attempt, wait_secs = wait, error = %last_error, "Retrying chat completion");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }

            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    last_error = LlmError::Timeout { timeout_secs: self.timeout_secs };
                    continue;
                }
                Err(e) => return Err(LlmError::ApiRequest { message: e.to_string() }),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let error = match status.as_u16() {
                401 | 403 => LlmError::AuthFailed { provider: "chat".to_string() },
                429 => LlmError::RateLimited {
                    retry_after_secs: response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok()),
                },
                code @ (503 | 529) => LlmError::Unavailable { status: code },
                code => LlmError::ApiRequest { message: format!("unexpected status {code}") },
            };
            if !error.is_retryable() {
                return Err(error);
            }
            last_error = error;
        }
        Err(last_error)
    }
}

fn parse_usage(value: &Value) -> Option<TokenUsage> {
    // Groq nests usage under x_groq on streamed responses.
    let usage = value.get("usage").or_else(|| value.get("x_groq").and_then(|g| g.get("usage")))?;
    Some(TokenUsage {
        input: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as usize,
        output: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as usize,
    })
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self.send(&request, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParse { message: e.to_string() })?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "response missing choices[0].message.content".to_string(),
            })?
            .to_string();
        let usage = parse_usage(&body).unwrap_or_default();

        debug!(model = %request.model, output_tokens = usage.output, "Chat completion finished");
        Ok(ChatResponse { content, usage })
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<TokenUsage, LlmError> {
        let response = self.send(&request, true).await?;
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut usage = TokenUsage::default();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let bytes = chunk.map_err(|e| LlmError::Streaming { message: e.to_string() })?;
            parser.push(&bytes);

            while let Some(event) = parser.next_event() {
                if event == "[DONE]" {
                    return Ok(usage);
                }
                let data: Value = serde_json::from_str(&event)
                    .map_err(|e| LlmError::Streaming { message: e.to_string() })?;
                if let Some(found) = parse_usage(&data) {
                    usage = found;
                }
                if let Some(token) = data["choices"][0]["delta"]["content"].as_str() {
                    if !token.is_empty() && tx.send(token.to_string()).await.is_err() {
                        // Receiver dropped; the caller gave up on the stream.
                        return Err(LlmError::Cancelled);
                    }
                }
            }
        }
        Ok(usage)
    }
}

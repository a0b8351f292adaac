//! Query embedding via an OpenAI-compatible embeddings endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::LlmError;
use crate::index::normalize;

/// Produces a unit-length embedding for a query string.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP client against an OpenAI-compatible `/embeddings` route.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::ApiRequest { message: e.to_string() })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .json(&EmbeddingsRequest { model: &self.model, input: text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout { timeout_secs: 30 }
            } else {
                LlmError::ApiRequest { message: e.to_string() }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed { provider: "embeddings".to_string() },
                429 => LlmError::RateLimited { retry_after_secs: None },
                code => LlmError::Unavailable { status: code },
            });
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParse { message: e.to_string() })?;
        let mut embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::ResponseParse {
                message: "embeddings response contained no data".to_string(),
            })?;

        if embedding.len() != self.dimension {
            return Err(LlmError::ResponseParse {
                message: format!(
                    "embedding dimension {} does not match configured {}",
                    embedding.len(),
                    self.dimension
                ),
            });
        }
        normalize(&mut embedding).ok_or_else(|| LlmError::ResponseParse {
            message: "embeddings endpoint returned a zero vector".to_string(),
        })?;

        debug!(chars = text.len(), dimension = embedding.len(), "Embedded query");
        Ok(embedding)
    }
}

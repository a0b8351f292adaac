//! Configuration system for the ClearPath service.
//!
//! Uses `figment` for layered configuration: defaults -> `clearpath.toml`
//! -> environment variables prefixed `CLEARPATH_` (double underscore as
//! the section separator, e.g. `CLEARPATH_SERVER__PORT=9000`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for the ClearPath service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub memory: MemoryConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Generation provider settings (OpenAI-compatible chat completions API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat completions endpoint.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Model for the lightweight tier (and for query rewriting).
    pub simple_model: String,
    /// Model for the heavyweight tier.
    pub complex_model: String,
    /// Bounded wait for each generation call.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            simple_model: "llama-3.1-8b-instant".to_string(),
            complex_model: "llama-3.3-70b-versatile".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    /// The model string for a routed tier.
    pub fn model_for(&self, tier: crate::types::Tier) -> &str {
        match tier {
            crate::types::Tier::Simple => &self.simple_model,
            crate::types::Tier::Complex => &self.complex_model,
        }
    }
}

/// Embedding service settings (OpenAI-compatible embeddings API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    /// Expected embedding dimension; the corpus index must match.
    pub dimension: usize,
    /// Path to the prebuilt segment index (JSON).
    pub index_path: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            api_key_env: "EMBEDDING_API_KEY".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            index_path: PathBuf::from("index/segments.json"),
        }
    }
}

/// Retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Result size cap.
    pub top_k: usize,
    /// Minimum cosine similarity score.
    pub floor: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            floor: 0.25,
        }
    }
}

/// Generation parameters per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub simple_max_tokens: u32,
    pub complex_max_tokens: u32,
    /// Cap for the follow-up rewrite call; rewritten queries are short.
    pub rewrite_max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            simple_max_tokens: 512,
            complex_max_tokens: 1024,
            rewrite_max_tokens: 128,
            temperature: 0.3,
        }
    }
}

impl GenerationConfig {
    pub fn max_tokens_for(&self, tier: crate::types::Tier) -> u32 {
        match tier {
            crate::types::Tier::Simple => self.simple_max_tokens,
            crate::types::Tier::Complex => self.complex_max_tokens,
        }
    }
}

/// Conversation store retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum turns retained per conversation (oldest evicted first).
    pub max_turns: usize,
    /// Recent turns included in prompts and rewrite calls.
    pub history_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            history_window: 3,
        }
    }
}

/// Load configuration with the standard layering.
///
/// `config_path` overrides the default `clearpath.toml` location.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let toml_path = config_path.unwrap_or_else(|| Path::new("clearpath.toml"));

    let figment = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(toml_path))
        .merge(Env::prefixed("CLEARPATH_").split("__"));

    let config: AppConfig = figment
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.retrieval.top_k == 0 {
        return Err(ConfigError::Invalid {
            message: "retrieval.top_k must be at least 1".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&config.retrieval.floor) {
        return Err(ConfigError::Invalid {
            message: format!(
                "retrieval.floor must be within [0.0, 1.0], got {}",
                config.retrieval.floor
            ),
        });
    }
    if config.memory.max_turns == 0 {
        return Err(ConfigError::Invalid {
            message: "memory.max_turns must be at least 1".to_string(),
        });
    }
    if config.embedding.dimension == 0 {
        return Err(ConfigError::Invalid {
            message: "embedding.dimension must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Resolve an API key from the environment variable named in the config.
pub fn resolve_api_key(api_key_env: &str) -> Result<String, ConfigError> {
    std::env::var(api_key_env).map_err(|_| ConfigError::EnvVarMissing {
        var: api_key_env.to_string(),
    })
}

//! Error types for the ClearPath core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM provider, embedding service, corpus index, prompt
//! assembly, and configuration domains.

use std::path::PathBuf;

/// Top-level error type for the ClearPath core library.
#[derive(Debug, thiserror::Error)]
pub enum ClearpathError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM and embedding service interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider (retry-after: {retry_after_secs:?})")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Provider temporarily unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Request was cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether a retry (same request or a lower tier) is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Unavailable { .. } | LlmError::Timeout { .. }
        )
    }
}

/// Errors from loading or validating the corpus index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Index file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Index parse error: {message}")]
    Parse { message: String },

    #[error("Segment '{segment}' has embedding dimension {found}, expected {expected}")]
    DimensionMismatch {
        segment: String,
        expected: usize,
        found: usize,
    },

    #[error("Segment '{segment}' has a zero embedding vector")]
    ZeroVector { segment: String },
}

/// Errors from prompt assembly.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Failed to generate context salt: {message}")]
    SaltGeneration { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `ClearpathError`.
pub type Result<T> = std::result::Result<T, ClearpathError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = ClearpathError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_index() {
        let err = ClearpathError::Index(IndexError::DimensionMismatch {
            segment: "pricing_01".into(),
            expected: 384,
            found: 768,
        });
        assert_eq!(
            err.to_string(),
            "Index error: Segment 'pricing_01' has embedding dimension 768, expected 384"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = ClearpathError::Config(ConfigError::EnvVarMissing {
            var: "GROQ_API_KEY".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Environment variable not set: GROQ_API_KEY"
        );
    }

    #[test]
    fn test_llm_error_retryable() {
        assert!(
            LlmError::RateLimited {
                retry_after_secs: Some(30)
            }
            .is_retryable()
        );
        assert!(LlmError::Unavailable { status: 503 }.is_retryable());
        assert!(LlmError::Timeout { timeout_secs: 30 }.is_retryable());
        assert!(
            !LlmError::AuthFailed {
                provider: "groq".into()
            }
            .is_retryable()
        );
        assert!(!LlmError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ClearpathError = io_err.into();
        assert!(matches!(err, ClearpathError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: ClearpathError = serde_err.into();
        assert!(matches!(err, ClearpathError::Serialization(_)));
    }
}

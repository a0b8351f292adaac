//! Core engine for the ClearPath support assistant.
//!
//! Answers customer questions over an embedded documentation corpus:
//! queries are routed to a generation tier by a deterministic complexity
//! score, follow-ups are rewritten into standalone form, relevant corpus
//! segments are retrieved by cosine similarity and wrapped in a salted
//! injection-hardened prompt, and every answer is evaluated for
//! reliability flags before delivery. Answers are available synchronously
//! or as a token stream.

pub mod config;
pub mod embedding;
pub mod error;
pub mod evaluator;
pub mod index;
pub mod memory;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod retriever;
pub mod router;
pub mod sse;
pub mod types;

pub use config::{AppConfig, load_config};
pub use error::{ClearpathError, Result};
pub use pipeline::QueryPipeline;
pub use types::{QueryRequest, QueryResponse, StreamEvent};

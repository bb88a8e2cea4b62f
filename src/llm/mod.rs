//! Model Providers
//!
//! The two remote capabilities the pipeline needs: turning text into
//! vectors, and turning a prompt into text. Neither layer retries; a failed
//! call surfaces to the caller as-is.

pub mod gemini;
#[cfg(test)]
pub mod hashing;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiClient;
#[cfg(test)]
pub use hashing::HashingEmbedder;

/// Embedding vector
pub type Embedding = Vec<f32>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Http(String),
    #[error("Embedding API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Malformed embedding response: {0}")]
    Malformed(String),
    #[error("Cannot embed empty text")]
    EmptyInput,
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        EmbeddingError::Http(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Http(String),
    #[error("Generation API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Malformed generation response: {0}")]
    Malformed(String),
    #[error("Generation blocked: {0}")]
    Blocked(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Http(e.to_string())
    }
}

/// Maps text into a fixed-dimensional vector space.
///
/// Documents and queries are embedded through separate calls because some
/// models encode the two sides of a retrieval pair differently.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed many texts for indexing; output order matches input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;

    /// Embed a single query for searching.
    async fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    fn model_name(&self) -> &str;
}

/// Produces text from a single prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}

/// Embedder trait and shared types for text embedding.
///
/// An embedder is a pure text → vector mapping. Batching policy, retries
/// and pacing belong to the ingestion orchestrator, not to implementations
/// of this trait.
pub mod azure;
pub mod mock;

use thiserror::Error;

use crate::config::{EmbeddingConfig, EmbeddingProvider};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    RequestFailed(String),

    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("expected {expected}-dimensional embeddings, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedderError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            EmbedderError::RequestFailed(_) => true,
            EmbedderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, same length and order as
    /// the input.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Build the embedder selected by `config.provider`.
pub fn from_config(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, EmbedderError> {
    match config.provider {
        EmbeddingProvider::Azure => Ok(Box::new(azure::AzureOpenAiEmbedder::new(config)?)),
        EmbeddingProvider::Mock => Ok(Box::new(mock::MockEmbedder::new(config.dimensions))),
    }
}

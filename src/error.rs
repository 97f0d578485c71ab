//! Error taxonomy for the ingestion, retrieval and generation pipeline.
//!
//! Library code returns [`Result`]; the `ka` binary wraps these in
//! `anyhow` for top-level reporting.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The embedding or generation model could not be loaded or did not respond.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Nothing is persisted at the configured index location yet.
    #[error("no vector index found at {0}; run ingestion first")]
    IndexNotFound(String),

    /// Ingestion produced zero chunks, or an index was built from nothing.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// A file extension the loader does not handle. Skipped during ingestion.
    #[error("unsupported document type: {0}")]
    UnsupportedDocumentType(String),

    /// Vectors from a different embedding model or dimensionality.
    #[error("index mismatch: {0}")]
    IndexMismatch(String),

    /// Question asked before any index was built.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The pipeline did not become ready within the configured wait.
    #[error("pipeline not ready after {0:?}")]
    WarmupTimeout(std::time::Duration),

    /// The generation backend failed or returned an unusable response.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("invalid question: {0}")]
    InvalidQuestion(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Text extraction from a binary document failed.
    #[error("failed to extract text from '{path}': {message}")]
    Extract { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn extract(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extract {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for the "nothing ingested yet" family of errors.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::IndexNotFound(_) | Self::RetrievalUnavailable(_))
    }
}

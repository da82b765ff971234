//! Error types for the `rag-core` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while chunking, embedding, indexing, or searching.
///
/// The core performs no retries: every variant is either a contract
/// violation by the caller ([`RagError::InvalidArgument`]) or a failure of an
/// external collaborator surfaced as-is.
#[derive(Debug, Error)]
pub enum RagError {
    /// The caller passed an empty query, blank content, a non-positive size,
    /// or an unrecognized chunking strategy.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding capability failed or returned malformed output.
    #[error("Embedding failure ({provider}): {message}")]
    EmbeddingFailure {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector index rejected a read or a write.
    #[error("Index failure ({backend}): {message}")]
    IndexFailure {
        /// The index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The text to be chunked could not be read.
    #[error("Source unavailable ({}): {source}", path.display())]
    SourceUnavailable {
        /// Path of the source that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Build an [`RagError::InvalidArgument`] from anything string-like.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Build an [`RagError::EmbeddingFailure`].
    pub fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingFailure { provider: provider.into(), message: message.into() }
    }

    /// Build an [`RagError::IndexFailure`].
    pub fn index(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IndexFailure { backend: backend.into(), message: message.into() }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

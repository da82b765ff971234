//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// Default slice size for [`EmbeddingProvider::encode_batch`].
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// A provider that generates fixed-dimension vector embeddings from text.
///
/// Implementations must be deterministic for identical input and model
/// version. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// calls [`embed`](EmbeddingProvider::embed) sequentially; backends that
/// support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use rag_core::{EmbeddingProvider, HashingEmbeddingProvider};
///
/// let provider = HashingEmbeddingProvider::new(256)?;
/// let embedding = provider.embed("你好").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// A short name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Embed `texts` in slices of at most `batch_size`, one
    /// [`embed_batch`](EmbeddingProvider::embed_batch) call per slice.
    ///
    /// This only bounds request size; slices are processed one after another.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `batch_size` is zero and
    /// [`RagError::EmbeddingFailure`] if a slice comes back with the wrong
    /// number of vectors.
    async fn encode_batch(&self, texts: &[&str], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        if batch_size == 0 {
            return Err(RagError::invalid("batch_size must be greater than zero"));
        }
        let mut embeddings = Vec::with_capacity(texts.len());
        for slice in texts.chunks(batch_size) {
            let batch = self.embed_batch(slice).await?;
            if batch.len() != slice.len() {
                return Err(RagError::embedding(
                    self.name(),
                    format!("expected {} embeddings, got {}", slice.len(), batch.len()),
                ));
            }
            embeddings.extend(batch);
        }
        Ok(embeddings)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Check that an embedding is non-empty, finite, and has the expected dimension.
///
/// # Errors
///
/// Returns [`RagError::EmbeddingFailure`] naming `provider` otherwise.
pub fn validate_embedding(provider: &str, embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.is_empty() {
        return Err(RagError::embedding(provider, "provider returned an empty vector"));
    }
    if embedding.len() != expected {
        return Err(RagError::embedding(
            provider,
            format!("expected dimension {expected}, got {}", embedding.len()),
        ));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(RagError::embedding(provider, "embedding contains non-finite values"));
    }
    Ok(())
}

//! Query embedding plus nearest-neighbor lookup.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, error};

use crate::document::{Candidate, Metadata};
use crate::embedding::{EmbeddingProvider, validate_embedding};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorIndex;

/// Turns a query into a similarity-ranked [`Candidate`] list against one
/// [`VectorIndex`].
///
/// The retriever has no state of its own and never writes to the index.
/// The caller chooses `k`, so over-fetching for a later re-rank stage is a
/// caller policy.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    /// Create a retriever over `index` using `embedder` for queries.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// The index this retriever reads from.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Fetch the `k` nearest records to `query`.
    ///
    /// Similarity is `1 - distance`. With `score_threshold = Some(t)` every
    /// candidate with `similarity < t` is dropped, so fewer than `k` results
    /// may come back. Results are ordered by descending similarity; ties keep
    /// the index's order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for a blank query or `k == 0`
    /// (before the embedder or index is called), [`RagError::EmbeddingFailure`]
    /// if the query embedding fails or is malformed, and
    /// [`RagError::IndexFailure`] if the index query fails.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        score_threshold: Option<f32>,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Candidate>> {
        if query.trim().is_empty() {
            return Err(RagError::invalid("query cannot be empty"));
        }
        if k == 0 {
            return Err(RagError::invalid("limit must be greater than zero"));
        }

        let vector = self.embedder.embed(query).await.inspect_err(|e| {
            error!(provider = self.embedder.name(), error = %e, "query embedding failed");
        })?;
        validate_embedding(self.embedder.name(), &vector, self.index.dimension())?;

        let hits = self.index.query(&vector, k, filter).await.inspect_err(|e| {
            error!(backend = self.index.backend(), error = %e, "index query failed");
        })?;
        let fetched = hits.len();

        let mut candidates: Vec<Candidate> = hits
            .into_iter()
            .map(|hit| Candidate {
                id: hit.id,
                text: hit.text,
                metadata: hit.metadata,
                similarity: 1.0 - hit.distance,
            })
            .filter(|c| score_threshold.is_none_or(|t| c.similarity >= t))
            .collect();
        candidates
            .sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));

        debug!(k, fetched, kept = candidates.len(), ?score_threshold, "retrieved candidates");
        Ok(candidates)
    }
}

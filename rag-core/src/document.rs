//! Data types for documents, chunks, index records, and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagError, Result};

/// Free-form key-value metadata attached to documents and index records.
pub type Metadata = HashMap<String, Value>;

/// A source document produced by an ingestion loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub content: String,
    /// Where the document came from (`"local"`, `"wiki"`, ...).
    pub source: String,
    /// Key-value metadata associated with the document.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document, rejecting blank content.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `content` is empty after trimming.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(RagError::invalid("document content cannot be empty"));
        }
        Ok(Self { id: id.into(), content, source: source.into(), metadata: Metadata::new() })
    }

    /// Attach metadata to the document.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The first 100 characters of the content, with an ellipsis when truncated.
    pub fn summary(&self) -> String {
        let mut chars = self.content.chars();
        let head: String = chars.by_ref().take(100).collect();
        if chars.next().is_some() { format!("{head}...") } else { head }
    }
}

/// A contiguous text unit cut from a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, `{document_id}_{sequence_index}`.
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Trimmed, non-empty chunk text.
    pub text: String,
    /// Position of this chunk within its document.
    pub sequence_index: usize,
    /// Document metadata plus `document_id`, `source`, and `chunk_index`.
    pub metadata: Metadata,
}

/// A record as stored in a vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedRecord {
    /// Unique record id within the collection.
    pub id: String,
    /// Embedding of `text`; its length equals the index dimension.
    pub vector: Vec<f32>,
    /// The stored text.
    pub text: String,
    /// Optional record metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// A retrieval hit with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Record id.
    pub id: String,
    /// Record text.
    pub text: String,
    /// Record metadata, if any was stored.
    pub metadata: Option<Metadata>,
    /// `1 - cosine_distance`.
    pub similarity: f32,
}

/// A [`Candidate`] re-scored by a [`Reranker`](crate::reranker::Reranker).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    /// The candidate as returned by the retriever.
    #[serde(flatten)]
    pub candidate: Candidate,
    /// The blended re-rank score.
    pub rerank_score: f32,
}

/// What [`RagPipeline::search`](crate::pipeline::RagPipeline::search) hands back
/// to the chat layer.
///
/// `rerank_score` is `Some` only when re-ranking is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved candidate.
    #[serde(flatten)]
    pub candidate: Candidate,
    /// The re-rank score, when re-ranking ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl SearchResult {
    /// The score results are ordered by: the re-rank score if present,
    /// otherwise the vector similarity.
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.candidate.similarity)
    }

    /// Shorthand for the candidate text.
    pub fn text(&self) -> &str {
        &self.candidate.text
    }
}

impl From<Candidate> for SearchResult {
    fn from(candidate: Candidate) -> Self {
        Self { candidate, rerank_score: None }
    }
}

impl From<RankedResult> for SearchResult {
    fn from(ranked: RankedResult) -> Self {
        Self { candidate: ranked.candidate, rerank_score: Some(ranked.rerank_score) }
    }
}

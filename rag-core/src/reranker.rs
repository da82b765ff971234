//! Reranker trait and the blended lexical/structural reranker.

use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use crate::document::{Candidate, RankedResult};
use crate::error::Result;

/// Weight of the original vector similarity.
pub const VECTOR_WEIGHT: f32 = 0.5;
/// Weight of the character overlap between query and content.
pub const KEYWORD_WEIGHT: f32 = 0.3;
/// Weight of the content length preference.
pub const LENGTH_WEIGHT: f32 = 0.2;

/// A reranker that re-scores and reorders retrieval candidates.
///
/// Implementations can use cross-encoder models, LLM-based scoring, or
/// other strategies to improve precision beyond initial vector similarity.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Re-score `candidates` against `query` and keep the best `top_k`.
    ///
    /// Results are ordered by descending `rerank_score`; equal scores keep
    /// their input order.
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Result<Vec<RankedResult>>;
}

/// Share of the query's distinct characters that also appear in `content`.
///
/// Whitespace is ignored on both sides. Returns `0.0` for a query with no
/// characters left. The denominator is the query's character set only, so
/// this is not a symmetric Jaccard index.
pub fn keyword_overlap(query: &str, content: &str) -> f32 {
    let query_chars: HashSet<char> = query.chars().filter(|c| !c.is_whitespace()).collect();
    if query_chars.is_empty() {
        return 0.0;
    }
    let content_chars: HashSet<char> = content.chars().filter(|c| !c.is_whitespace()).collect();
    let overlap = query_chars.intersection(&content_chars).count();
    (overlap as f32 / query_chars.len() as f32).min(1.0)
}

/// Preference for moderately sized content.
///
/// `1.0` for 200–500 characters, a linear ramp below 200, and a linear decay
/// above 500 that bottoms out at `0.5`.
pub fn length_score(content: &str) -> f32 {
    let length = content.chars().count() as f32;
    if (200.0..=500.0).contains(&length) {
        1.0
    } else if length < 200.0 {
        length / 200.0
    } else {
        (1.0 - (length - 500.0) / 1000.0).max(0.5)
    }
}

/// Blends vector similarity, character overlap, and length preference:
///
/// ```text
/// rerank_score = 0.5 * similarity + 0.3 * keyword_overlap + 0.2 * length_score
/// ```
///
/// # Example
///
/// ```rust,ignore
/// use rag_core::{BlendedReranker, Reranker};
///
/// let reranker = BlendedReranker::new();
/// let ranked = reranker.rerank("北京", candidates, 5).await?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BlendedReranker;

impl BlendedReranker {
    /// Create a new `BlendedReranker`.
    pub fn new() -> Self {
        Self
    }

    /// The blended score of one candidate.
    pub fn score(&self, query: &str, candidate: &Candidate) -> f32 {
        VECTOR_WEIGHT * candidate.similarity
            + KEYWORD_WEIGHT * keyword_overlap(query, &candidate.text)
            + LENGTH_WEIGHT * length_score(&candidate.text)
    }

    /// Synchronous form of [`Reranker::rerank`].
    pub fn rank(&self, query: &str, candidates: Vec<Candidate>, top_k: usize) -> Vec<RankedResult> {
        let mut ranked: Vec<RankedResult> = candidates
            .into_iter()
            .map(|candidate| {
                let rerank_score = self.score(query, &candidate);
                RankedResult { candidate, rerank_score }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.rerank_score.partial_cmp(&a.rerank_score).unwrap_or(Ordering::Equal)
        });
        ranked.truncate(top_k);
        ranked
    }
}

#[async_trait]
impl Reranker for BlendedReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Result<Vec<RankedResult>> {
        let input = candidates.len();
        let ranked = self.rank(query, candidates, top_k);
        debug!(input, output = ranked.len(), top_k, "reranked candidates");
        Ok(ranked)
    }
}

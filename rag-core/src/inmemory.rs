//! In-memory vector index using cosine distance.
//!
//! This module provides [`InMemoryVectorIndex`], a zero-dependency index
//! backed by a `Vec` protected by a `tokio::sync::RwLock`. Records keep their
//! insertion order, which is the tie-break order for equal distances. It is
//! suitable for development, testing, and small collections.

use std::cmp::Ordering;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{IndexedRecord, Metadata};
use crate::error::{RagError, Result};
use crate::vectorstore::{QueryHit, VectorIndex, matches_filter};

const BACKEND: &str = "in_memory";

/// An in-memory [`VectorIndex`] holding one collection.
///
/// # Example
///
/// ```rust,ignore
/// use rag_core::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new("documents", 256);
/// assert_eq!(index.count().await?, 0);
/// ```
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    name: String,
    dimension: usize,
    records: RwLock<Vec<IndexedRecord>>,
}

impl InMemoryVectorIndex {
    /// Create an empty collection with a fixed vector dimension.
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self { name: name.into(), dimension, records: RwLock::new(Vec::new()) }
    }

    fn check_dimension(&self, len: usize, what: &str) -> Result<()> {
        if len != self.dimension {
            return Err(RagError::index(
                BACKEND,
                format!(
                    "{what} has dimension {len}, collection '{}' expects {}",
                    self.name, self.dimension
                ),
            ));
        }
        Ok(())
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn collection_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(&self, record: IndexedRecord) -> Result<String> {
        let mut ids = self.add_batch(vec![record]).await?;
        ids.pop().ok_or_else(|| RagError::index(BACKEND, "add produced no id"))
    }

    /// Validates the whole batch before storing any of it.
    async fn add_batch(&self, records: Vec<IndexedRecord>) -> Result<Vec<String>> {
        let mut store = self.records.write().await;
        for (i, record) in records.iter().enumerate() {
            self.check_dimension(record.vector.len(), &format!("record '{}'", record.id))?;
            let duplicate = store.iter().any(|r| r.id == record.id)
                || records[..i].iter().any(|r| r.id == record.id);
            if duplicate {
                return Err(RagError::index(
                    BACKEND,
                    format!("record id '{}' already exists in '{}'", record.id, self.name),
                ));
            }
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        store.extend(records);
        debug!(collection = %self.name, added = ids.len(), total = store.len(), "added records");
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryHit>> {
        self.check_dimension(vector.len(), "query vector")?;
        let store = self.records.read().await;

        let mut hits: Vec<QueryHit> = store
            .iter()
            .filter(|r| filter.is_none_or(|f| matches_filter(r.metadata.as_ref(), f)))
            .map(|r| QueryHit {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: 1.0 - cosine_similarity(&r.vector, vector),
            })
            .collect();

        // stable: equal distances keep insertion order
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        let mut store = self.records.write().await;
        store.retain(|r| !ids.contains(&r.id.as_str()));
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut store = self.records.write().await;
        store.clear();
        debug!(collection = %self.name, "reset collection");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

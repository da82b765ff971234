//! Vector index trait for storing and searching embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{IndexedRecord, Metadata};
use crate::error::Result;

/// One nearest-neighbor hit as reported by a [`VectorIndex`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryHit {
    /// Record id.
    pub id: String,
    /// Record text.
    pub text: String,
    /// Record metadata, if any.
    pub metadata: Option<Metadata>,
    /// Cosine distance in `[0, 2]`.
    pub distance: f32,
}

/// A single fixed-dimension collection of [`IndexedRecord`]s searchable by
/// cosine distance.
///
/// The dimension is fixed when the index is created; records and queries of
/// any other length are rejected with
/// [`RagError::IndexFailure`](crate::error::RagError::IndexFailure).
/// Implementations must be safe to share between tasks.
///
/// # Example
///
/// ```rust,ignore
/// use rag_core::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new("docs", 256);
/// index.add(record).await?;
/// let hits = index.query(&query_embedding, 5, None).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name used in logs and errors.
    fn backend(&self) -> &str;

    /// Name of the collection this index serves.
    fn collection_name(&self) -> &str;

    /// The fixed vector dimension of this collection.
    fn dimension(&self) -> usize;

    /// Store one record and return its id.
    async fn add(&self, record: IndexedRecord) -> Result<String>;

    /// Store several records and return their ids in input order.
    ///
    /// The default implementation calls [`add`](VectorIndex::add) for each
    /// record and stops at the first failure.
    async fn add_batch(&self, records: Vec<IndexedRecord>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.add(record).await?);
        }
        Ok(ids)
    }

    /// Return up to `k` records nearest to `vector`, closest first.
    ///
    /// When `filter` is given, only records whose metadata contains every
    /// key of the filter with an equal value are considered.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryHit>>;

    /// Delete records by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[&str]) -> Result<()>;

    /// Remove every record, leaving an empty collection of the same dimension.
    async fn reset(&self) -> Result<()>;

    /// Number of records currently stored.
    async fn count(&self) -> Result<usize>;
}

/// Equality match of every filter entry against record metadata.
///
/// An empty filter matches everything, including records without metadata.
pub fn matches_filter(metadata: Option<&Metadata>, filter: &Metadata) -> bool {
    if filter.is_empty() {
        return true;
    }
    let Some(metadata) = metadata else {
        return false;
    };
    filter.iter().all(|(key, expected)| metadata.get(key) == Some(expected))
}

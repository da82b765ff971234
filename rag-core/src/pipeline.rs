//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] is the composition root behind one
//! [`search`](RagPipeline::search) operation. It composes an
//! [`EmbeddingProvider`], the active [`VectorIndex`], and an optional
//! [`Reranker`]. With a reranker it fetches `2 × limit` candidates, re-ranks
//! them and truncates to `limit`.
//!
//! Chunking happens before the pipeline: the write path takes text (or
//! [`Chunk`]s from a [`Chunker`](crate::chunking::Chunker)) and only embeds and
//! stores it.
//!
//! Writes, [`reset`](RagPipeline::reset), and [`refresh`](RagPipeline::refresh)
//! serialize on one writer lock. Searches never wait for that lock. During a
//! refresh they keep reading the previous index until the new one is swapped
//! in.
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_core::{HashingEmbeddingProvider, InMemoryVectorIndex, RagConfig, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .vector_index(Arc::new(InMemoryVectorIndex::new("documents", 256)))
//!     .build()?;
//!
//! pipeline.add_document("中国的首都是北京", None, None).await?;
//! let results = pipeline.search("北京是哪个国家的首都", 1).await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::RagConfig;
use crate::document::{Chunk, IndexedRecord, Metadata, SearchResult};
use crate::embedding::{EmbeddingProvider, validate_embedding};
use crate::error::{RagError, Result};
use crate::reranker::Reranker;
use crate::retriever::Retriever;
use crate::vectorstore::VectorIndex;

/// Candidates fetched per requested result when re-ranking is enabled.
pub const RERANK_OVERFETCH_FACTOR: usize = 2;

/// Per-call search parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Number of results wanted.
    pub limit: usize,
    /// Inclusive similarity floor.
    pub score_threshold: Option<f32>,
    /// Metadata equality filter.
    pub filter: Option<Metadata>,
}

impl SearchOptions {
    /// Options asking for `limit` results with no threshold or filter.
    pub fn new(limit: usize) -> Self {
        Self { limit, ..Self::default() }
    }

    /// Drop candidates whose similarity is below `threshold`.
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    /// Only consider records whose metadata matches every entry of `filter`.
    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Whether the active collection holds any records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    /// No records; searches return an empty list.
    Empty,
    /// At least one record has been written.
    Populated,
}

/// A snapshot of the active collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Number of stored records.
    pub count: usize,
    /// Fixed vector dimension.
    pub dimension: usize,
    /// Derived from `count`.
    pub state: CollectionState,
}

/// The RAG pipeline orchestrator.
///
/// Construct one via [`RagPipeline::builder()`] or
/// [`create_pipeline`](crate::factory::create_pipeline).
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    active: RwLock<Arc<dyn VectorIndex>>,
    reranker: Option<Arc<dyn Reranker>>,
    writer: Mutex<()>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// The index searches currently read from.
    pub async fn vector_index(&self) -> Arc<dyn VectorIndex> {
        self.active.read().await.clone()
    }

    /// Whether searches go through the re-rank stage.
    pub fn reranking_enabled(&self) -> bool {
        self.reranker.is_some()
    }

    /// Search with the configured default score threshold.
    ///
    /// # Errors
    ///
    /// See [`search_with`](RagPipeline::search_with).
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let options = SearchOptions {
            limit,
            score_threshold: self.config.default_score_threshold,
            filter: None,
        };
        self.search_with(query, &options).await
    }

    /// Search with the configured default limit and score threshold.
    ///
    /// # Errors
    ///
    /// See [`search_with`](RagPipeline::search_with).
    pub async fn search_default(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.search(query, self.config.default_search_limit).await
    }

    /// Search for the records most relevant to `query`.
    ///
    /// Without a reranker this returns at most `limit` candidates by
    /// descending similarity. With one, `2 × limit` candidates are retrieved
    /// and re-ranked down to `limit`, ordered by descending `rerank_score`.
    /// An empty collection yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for a blank query or a zero
    /// limit, before anything else is called. Embedding and index failures
    /// are returned as they were raised.
    pub async fn search_with(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let retriever = Retriever::new(self.embedding_provider.clone(), self.vector_index().await);
        let limit = options.limit;
        let threshold = options.score_threshold;
        let filter = options.filter.as_ref();

        let results: Vec<SearchResult> = match &self.reranker {
            None => {
                let candidates = retriever.search(query, limit, threshold, filter).await?;
                candidates.into_iter().map(SearchResult::from).collect()
            }
            Some(reranker) => {
                let k = limit.saturating_mul(RERANK_OVERFETCH_FACTOR);
                let candidates = retriever.search(query, k, threshold, filter).await?;
                let ranked = reranker.rerank(query, candidates, limit).await.inspect_err(|e| {
                    error!(error = %e, "reranking failed");
                })?;
                ranked.into_iter().map(SearchResult::from).collect()
            }
        };

        info!(
            limit,
            result_count = results.len(),
            reranked = self.reranker.is_some(),
            "search completed"
        );
        Ok(results)
    }

    /// Embed and store one text. Returns the record id, a new UUID v4 when
    /// `id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for blank content,
    /// [`RagError::EmbeddingFailure`] for a failed or malformed embedding, and
    /// [`RagError::IndexFailure`] if the index rejects the record.
    pub async fn add_document(
        &self,
        content: &str,
        metadata: Option<Metadata>,
        id: Option<String>,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(RagError::invalid("document content cannot be empty"));
        }
        let vector = self.embedding_provider.embed(content).await.inspect_err(|e| {
            error!(provider = self.embedding_provider.name(), error = %e, "embedding failed");
        })?;
        let provider = self.embedding_provider.name();
        validate_embedding(provider, &vector, self.embedding_provider.dimensions())?;

        let record = IndexedRecord {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            vector,
            text: content.to_string(),
            metadata,
        };

        let _guard = self.writer.lock().await;
        let index = self.vector_index().await;
        let id = index.add(record).await.inspect_err(|e| {
            error!(backend = index.backend(), error = %e, "failed to add document");
        })?;
        info!(collection = index.collection_name(), %id, "added document");
        Ok(id)
    }

    /// Embed and store several texts with optional parallel metadata and ids.
    ///
    /// Embedding runs in slices of `embedding.batch_size`. Returns the stored
    /// ids in input order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if any content is blank or if
    /// `metadatas` or `ids` differ in length from `contents`. Embedding and
    /// index failures are returned as raised; nothing is stored if embedding
    /// fails.
    pub async fn add_documents(
        &self,
        contents: &[&str],
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        if contents.is_empty() {
            warn!("add_documents called with no contents");
            return Ok(Vec::new());
        }
        if contents.iter().any(|c| c.trim().is_empty()) {
            return Err(RagError::invalid("document content cannot be empty"));
        }
        if let Some(metadatas) = &metadatas {
            if metadatas.len() != contents.len() {
                return Err(RagError::invalid(format!(
                    "got {} metadata entries for {} documents",
                    metadatas.len(),
                    contents.len()
                )));
            }
        }
        if let Some(ids) = &ids {
            if ids.len() != contents.len() {
                return Err(RagError::invalid(format!(
                    "got {} ids for {} documents",
                    ids.len(),
                    contents.len()
                )));
            }
        }

        let ids = ids.unwrap_or_else(|| {
            contents.iter().map(|_| uuid::Uuid::new_v4().to_string()).collect()
        });
        let metadatas: Vec<Option<Metadata>> = match metadatas {
            Some(metadatas) => metadatas.into_iter().map(Some).collect(),
            None => vec![None; contents.len()],
        };

        let records = self.embed_records(contents, ids, metadatas).await?;
        let _guard = self.writer.lock().await;
        let index = self.vector_index().await;
        self.store(index.as_ref(), records).await
    }

    /// Embed and store pre-cut chunks under their own ids and metadata.
    ///
    /// # Errors
    ///
    /// As for [`add_documents`](RagPipeline::add_documents).
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.chunk_records(chunks).await?;
        let _guard = self.writer.lock().await;
        let index = self.vector_index().await;
        self.store(index.as_ref(), records).await
    }

    /// Delete records by id. Unknown ids are ignored.
    pub async fn delete(&self, ids: &[&str]) -> Result<()> {
        let _guard = self.writer.lock().await;
        let index = self.vector_index().await;
        index.delete(ids).await.inspect_err(|e| {
            error!(backend = index.backend(), error = %e, "delete failed");
        })?;
        info!(collection = index.collection_name(), deleted = ids.len(), "deleted records");
        Ok(())
    }

    /// Empty the active collection.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] when `vector_store.allow_reset` is
    /// off, and the index's error if the reset itself fails.
    pub async fn reset(&self) -> Result<()> {
        if !self.config.vector_store.allow_reset {
            return Err(RagError::ConfigError(
                "reset is disabled by vector_store.allow_reset".to_string(),
            ));
        }
        let _guard = self.writer.lock().await;
        let index = self.vector_index().await;
        index.reset().await.inspect_err(|e| {
            error!(backend = index.backend(), error = %e, "reset failed");
        })?;
        info!(collection = index.collection_name(), "reset collection");
        Ok(())
    }

    /// Rebuild the collection into `staging` and swap it in.
    ///
    /// The writer lock is held for the whole reset-and-repopulate sequence.
    /// Searches keep reading the previous index until the swap, so they
    /// never see a partially populated collection. Returns the index that was
    /// replaced. On failure the active index is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `staging` has a different
    /// dimension than the embedding provider, [`RagError::InvalidArgument`]
    /// if `staging` is the active index, plus any embedding or index failure
    /// during repopulation.
    pub async fn refresh(
        &self,
        staging: Arc<dyn VectorIndex>,
        chunks: &[Chunk],
    ) -> Result<Arc<dyn VectorIndex>> {
        if staging.dimension() != self.embedding_provider.dimensions() {
            return Err(RagError::ConfigError(format!(
                "staging index dimension {} does not match embedding dimension {}",
                staging.dimension(),
                self.embedding_provider.dimensions()
            )));
        }

        let _guard = self.writer.lock().await;
        let active = self.vector_index().await;
        if std::ptr::addr_eq(Arc::as_ptr(&staging), Arc::as_ptr(&active)) {
            return Err(RagError::invalid("staging index must not be the active index"));
        }
        drop(active);

        staging.reset().await.inspect_err(|e| {
            error!(backend = staging.backend(), error = %e, "failed to reset staging index");
        })?;
        if !chunks.is_empty() {
            let records = self.chunk_records(chunks).await?;
            self.store(staging.as_ref(), records).await?;
        }

        let previous = {
            let mut active = self.active.write().await;
            std::mem::replace(&mut *active, staging)
        };
        info!(
            collection = previous.collection_name(),
            records = chunks.len(),
            "refreshed collection"
        );
        Ok(previous)
    }

    /// Whether the active collection is empty or populated.
    pub async fn state(&self) -> Result<CollectionState> {
        Ok(self.collection_info().await?.state)
    }

    /// Name, size, and dimension of the active collection.
    pub async fn collection_info(&self) -> Result<CollectionInfo> {
        let index = self.vector_index().await;
        let count = index.count().await?;
        let state = if count == 0 { CollectionState::Empty } else { CollectionState::Populated };
        Ok(CollectionInfo {
            name: index.collection_name().to_string(),
            count,
            dimension: index.dimension(),
            state,
        })
    }

    async fn chunk_records(&self, chunks: &[Chunk]) -> Result<Vec<IndexedRecord>> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let ids = chunks.iter().map(|c| c.id.clone()).collect();
        let metadatas = chunks.iter().map(|c| Some(c.metadata.clone())).collect();
        self.embed_records(&texts, ids, metadatas).await
    }

    async fn embed_records(
        &self,
        texts: &[&str],
        ids: Vec<String>,
        metadatas: Vec<Option<Metadata>>,
    ) -> Result<Vec<IndexedRecord>> {
        let provider = self.embedding_provider.name();
        let dimension = self.embedding_provider.dimensions();
        let vectors = self
            .embedding_provider
            .encode_batch(texts, self.config.embedding.batch_size)
            .await
            .inspect_err(|e| error!(provider, error = %e, "batch embedding failed"))?;
        for vector in &vectors {
            validate_embedding(provider, vector, dimension)?;
        }

        Ok(texts
            .iter()
            .zip(ids)
            .zip(metadatas)
            .zip(vectors)
            .map(|(((text, id), metadata), vector)| IndexedRecord {
                id,
                vector,
                text: (*text).to_string(),
                metadata,
            })
            .collect())
    }

    async fn store(
        &self,
        index: &dyn VectorIndex,
        records: Vec<IndexedRecord>,
    ) -> Result<Vec<String>> {
        let ids = index.add_batch(records).await.inspect_err(|e| {
            error!(backend = index.backend(), error = %e, "failed to store records");
        })?;
        info!(collection = index.collection_name(), added = ids.len(), "stored records");
        Ok(ids)
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `config`, `embedding_provider`, and `vector_index` are required; the
/// reranker is optional. Call [`build()`](RagPipelineBuilder::build) to
/// validate and produce the pipeline.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default_chinese())
///     .embedding_provider(Arc::new(embedder))
///     .vector_index(Arc::new(index))
///     .reranker(Arc::new(BlendedReranker::new()))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector index.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    /// Set an optional reranker for post-search result reordering.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any required field is missing, the
    /// configuration is invalid, or the index dimension differs from the
    /// embedding dimension.
    pub fn build(self) -> Result<RagPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let vector_index = self
            .vector_index
            .ok_or_else(|| RagError::ConfigError("vector_index is required".to_string()))?;

        if vector_index.dimension() != embedding_provider.dimensions() {
            return Err(RagError::ConfigError(format!(
                "vector index dimension {} does not match embedding dimension {}",
                vector_index.dimension(),
                embedding_provider.dimensions()
            )));
        }

        Ok(RagPipeline {
            config,
            embedding_provider,
            active: RwLock::new(vector_index),
            reranker: self.reranker,
            writer: Mutex::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::HashingEmbeddingProvider;
    use crate::inmemory::InMemoryVectorIndex;

    fn pipeline(config: RagConfig) -> RagPipeline {
        RagPipeline::builder()
            .config(config)
            .embedding_provider(Arc::new(HashingEmbeddingProvider::new(64).unwrap()))
            .vector_index(Arc::new(InMemoryVectorIndex::new("test", 64)))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_matching_dimensions() {
        let result = RagPipeline::builder()
            .config(RagConfig::default())
            .embedding_provider(Arc::new(HashingEmbeddingProvider::new(64).unwrap()))
            .vector_index(Arc::new(InMemoryVectorIndex::new("test", 32)))
            .build();
        assert!(matches!(result, Err(RagError::ConfigError(_))));

        let result = RagPipeline::builder().config(RagConfig::default()).build();
        assert!(matches!(result, Err(RagError::ConfigError(_))));
    }

    #[tokio::test]
    async fn add_document_generates_uuid_ids() {
        let pipeline = pipeline(RagConfig::default());
        assert_eq!(pipeline.state().await.unwrap(), CollectionState::Empty);

        let id = pipeline.add_document("天气很好", None, None).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let given = pipeline.add_document("下雨了", None, Some("rain".into())).await.unwrap();
        assert_eq!(given, "rain");

        let info = pipeline.collection_info().await.unwrap();
        assert_eq!(info.count, 2);
        assert_eq!(info.dimension, 64);
        assert_eq!(info.state, CollectionState::Populated);
    }

    #[tokio::test]
    async fn add_documents_checks_parallel_lengths() {
        let pipeline = pipeline(RagConfig::default());
        let err = pipeline
            .add_documents(&["一", "二"], Some(vec![Metadata::new()]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));

        let err = pipeline.add_documents(&["一", " "], None, None).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
        assert_eq!(pipeline.collection_info().await.unwrap().count, 0);

        let ids = pipeline
            .add_documents(&["一", "二"], None, Some(vec!["a".into(), "b".into()]))
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reset_respects_allow_reset() {
        let mut config = RagConfig::default();
        config.vector_store.allow_reset = false;
        let pipeline = pipeline(config);
        pipeline.add_document("内容", None, None).await.unwrap();
        assert!(matches!(pipeline.reset().await, Err(RagError::ConfigError(_))));
        assert_eq!(pipeline.state().await.unwrap(), CollectionState::Populated);
    }

    #[tokio::test]
    async fn refresh_rejects_the_active_index_as_staging() {
        let pipeline = pipeline(RagConfig::default());
        pipeline.add_document("内容", None, None).await.unwrap();

        let active = pipeline.vector_index().await;
        let err = pipeline.refresh(active, &[]).await.err().unwrap();
        assert!(matches!(err, RagError::InvalidArgument(_)));
        assert_eq!(pipeline.collection_info().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn search_default_uses_configured_limit() {
        let config = RagConfig::builder().default_search_limit(2).build().unwrap();
        let pipeline = pipeline(config);
        pipeline.add_documents(&["甲", "乙", "丙"], None, None).await.unwrap();

        assert_eq!(pipeline.search_default("甲").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn refresh_rejects_mismatched_staging_index() {
        let pipeline = pipeline(RagConfig::default());
        let staging: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new("staging", 8));
        let err = pipeline.refresh(staging, &[]).await.err().unwrap();
        assert!(matches!(err, RagError::ConfigError(_)));
    }
}

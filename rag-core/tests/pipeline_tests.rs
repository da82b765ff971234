//! End-to-end pipeline behavior over the offline embedding and index backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rag_core::chunking::{Chunker, SentenceChunker};
use rag_core::config::RagConfig;
use rag_core::document::{Document, IndexedRecord, Metadata};
use rag_core::embedding::EmbeddingProvider;
use rag_core::error::{RagError, Result};
use rag_core::hashing::HashingEmbeddingProvider;
use rag_core::inmemory::InMemoryVectorIndex;
use rag_core::pipeline::{CollectionState, RagPipeline, SearchOptions};
use rag_core::reranker::BlendedReranker;
use rag_core::vectorstore::{QueryHit, VectorIndex};
use tokio::sync::Notify;

const CAPITALS: [&str; 3] = ["中国的首都是北京", "法国的首都是巴黎", "日本的首都是东京"];

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Wraps an in-memory index and records how it is queried.
struct CountingIndex {
    inner: InMemoryVectorIndex,
    queries: AtomicUsize,
    last_k: AtomicUsize,
}

impl CountingIndex {
    fn new(dimension: usize) -> Self {
        Self {
            inner: InMemoryVectorIndex::new("counted", dimension),
            queries: AtomicUsize::new(0),
            last_k: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    fn backend(&self) -> &str {
        "counting"
    }

    fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn add(&self, record: IndexedRecord) -> Result<String> {
        self.inner.add(record).await
    }

    async fn add_batch(&self, records: Vec<IndexedRecord>) -> Result<Vec<String>> {
        self.inner.add_batch(records).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryHit>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.last_k.store(k, Ordering::SeqCst);
        self.inner.query(vector, k, filter).await
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        self.inner.delete(ids).await
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// An index whose batch writes wait until released.
struct GatedIndex {
    inner: InMemoryVectorIndex,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl VectorIndex for GatedIndex {
    fn backend(&self) -> &str {
        "gated"
    }

    fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn add(&self, record: IndexedRecord) -> Result<String> {
        self.inner.add(record).await
    }

    async fn add_batch(&self, records: Vec<IndexedRecord>) -> Result<Vec<String>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.add_batch(records).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryHit>> {
        self.inner.query(vector, k, filter).await
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        self.inner.delete(ids).await
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// Always fails.
struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    fn name(&self) -> &str {
        "broken"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::embedding("broken", "model not loaded"))
    }

    fn dimensions(&self) -> usize {
        4
    }
}

fn build(config: RagConfig, index: Arc<dyn VectorIndex>) -> RagPipeline {
    let mut builder = RagPipeline::builder()
        .config(config.clone())
        .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
        .vector_index(index);
    if config.enable_reranking {
        builder = builder.reranker(Arc::new(BlendedReranker::new()));
    }
    builder.build().unwrap()
}

fn default_index() -> Arc<dyn VectorIndex> {
    let dimension = HashingEmbeddingProvider::default().dimensions();
    Arc::new(InMemoryVectorIndex::new("documents", dimension))
}

#[tokio::test]
async fn capital_query_finds_matching_document() {
    init_tracing();
    for config in [RagConfig::default(), RagConfig::default_chinese()] {
        let pipeline = build(config, default_index());
        pipeline.add_documents(&CAPITALS, None, None).await.unwrap();

        let results = pipeline.search("北京是哪个国家的首都", 1).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text(), "中国的首都是北京");
        assert_eq!(results[0].rerank_score.is_some(), pipeline.reranking_enabled());
    }
}

#[tokio::test]
async fn blank_query_never_reaches_the_index() {
    let index = Arc::new(CountingIndex::new(HashingEmbeddingProvider::default().dimensions()));
    let pipeline = build(RagConfig::default(), index.clone());
    pipeline.add_documents(&CAPITALS, None, None).await.unwrap();

    let err = pipeline.search("", 5).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
    let err = pipeline.search("   ", 5).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
    let err = pipeline.search("首都", 0).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));

    assert_eq!(index.queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reranking_fetches_twice_the_limit() {
    let dimension = HashingEmbeddingProvider::default().dimensions();

    let plain_index = Arc::new(CountingIndex::new(dimension));
    let plain = build(RagConfig::default(), plain_index.clone());
    plain.add_documents(&CAPITALS, None, None).await.unwrap();
    plain.search("首都", 2).await.unwrap();
    assert_eq!(plain_index.last_k.load(Ordering::SeqCst), 2);

    let reranked_index = Arc::new(CountingIndex::new(dimension));
    let reranked = build(RagConfig::default_chinese(), reranked_index.clone());
    reranked.add_documents(&CAPITALS, None, None).await.unwrap();
    let results = reranked.search("首都", 2).await.unwrap();
    assert_eq!(reranked_index.last_k.load(Ordering::SeqCst), 4);
    assert_eq!(results.len(), 2);
    assert!(results[0].score() >= results[1].score());
}

#[tokio::test]
async fn result_count_is_min_of_limit_and_records() {
    let pipeline = build(RagConfig::default(), default_index());
    pipeline.add_documents(&CAPITALS, None, None).await.unwrap();

    assert_eq!(pipeline.search("首都", 2).await.unwrap().len(), 2);
    assert_eq!(pipeline.search("首都", 10).await.unwrap().len(), 3);

    let results = pipeline.search("首都", 10).await.unwrap();
    for window in results.windows(2) {
        assert!(window[0].candidate.similarity >= window[1].candidate.similarity);
    }
}

#[tokio::test]
async fn default_threshold_drops_weak_matches() {
    let config = RagConfig::builder().default_score_threshold(0.99).build().unwrap();
    let pipeline = build(config, default_index());
    pipeline.add_documents(&CAPITALS, None, None).await.unwrap();

    let results = pipeline.search("中国的首都是北京", 3).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].candidate.similarity >= 0.99);
}

#[tokio::test]
async fn per_call_threshold_applies_without_a_default() {
    let pipeline = build(RagConfig::default(), default_index());
    pipeline.add_documents(&CAPITALS, None, None).await.unwrap();
    assert_eq!(pipeline.search("中国的首都是北京", 3).await.unwrap().len(), 3);

    let options = SearchOptions::new(3).with_score_threshold(0.99);
    let results = pipeline.search_with("中国的首都是北京", &options).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text(), "中国的首都是北京");
}

#[tokio::test]
async fn metadata_filter_restricts_candidates() {
    let pipeline = build(RagConfig::default(), default_index());
    let metadatas: Vec<Metadata> = ["asia", "europe", "asia"]
        .iter()
        .map(|region| Metadata::from([("region".to_string(), (*region).into())]))
        .collect();
    pipeline.add_documents(&CAPITALS, Some(metadatas), None).await.unwrap();

    let filter = Metadata::from([("region".to_string(), "europe".into())]);
    let options = SearchOptions::new(3).with_filter(filter);
    let results = pipeline.search_with("首都", &options).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text(), "法国的首都是巴黎");
}

#[tokio::test]
async fn search_after_reset_is_empty_not_an_error() {
    let pipeline = build(RagConfig::default(), default_index());
    pipeline.add_documents(&CAPITALS, None, None).await.unwrap();
    assert_eq!(pipeline.state().await.unwrap(), CollectionState::Populated);

    pipeline.reset().await.unwrap();

    assert_eq!(pipeline.state().await.unwrap(), CollectionState::Empty);
    assert!(pipeline.search("北京", 5).await.unwrap().is_empty());
    assert!(pipeline.search("北京", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn chunks_and_deletes_round_trip() {
    let document = Document::new("travel", "北京有故宫。巴黎有铁塔。东京有浅草寺。", "local").unwrap();
    let chunks = SentenceChunker::new(6).unwrap().chunk(&document).unwrap();
    let pipeline = build(RagConfig::default(), default_index());

    let ids = pipeline.add_chunks(&chunks).await.unwrap();
    assert_eq!(ids, vec!["travel_0", "travel_1", "travel_2"]);

    let results = pipeline.search("故宫", 1).await.unwrap();
    let metadata = results[0].candidate.metadata.as_ref().unwrap();
    assert_eq!(metadata["document_id"], "travel");
    assert_eq!(metadata["chunk_index"], 0);

    pipeline.delete(&["travel_0", "missing"]).await.unwrap();
    let info = pipeline.collection_info().await.unwrap();
    assert_eq!(info.count, 2);
    assert_eq!(info.name, "documents");
}

#[tokio::test]
async fn duplicate_ids_are_index_failures() {
    let pipeline = build(RagConfig::default(), default_index());
    pipeline.add_document("第一条", None, Some("dup".into())).await.unwrap();
    let err = pipeline.add_document("第二条", None, Some("dup".into())).await.unwrap_err();
    assert!(matches!(err, RagError::IndexFailure { .. }));
}

#[tokio::test]
async fn embedding_failures_propagate_verbatim() {
    let pipeline = RagPipeline::builder()
        .config(RagConfig::default())
        .embedding_provider(Arc::new(BrokenEmbedder))
        .vector_index(Arc::new(InMemoryVectorIndex::new("documents", 4)))
        .build()
        .unwrap();

    let err = pipeline.search("北京", 1).await.unwrap_err();
    match err {
        RagError::EmbeddingFailure { provider, message } => {
            assert_eq!(provider, "broken");
            assert_eq!(message, "model not loaded");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(pipeline.add_document("北京", None, None).await.is_err());
    assert_eq!(pipeline.collection_info().await.unwrap().count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_serves_stale_data_until_swap() {
    init_tracing();
    let pipeline = Arc::new(build(RagConfig::default(), default_index()));
    pipeline.add_document("旧数据：上海天气晴", None, Some("old".into())).await.unwrap();

    let dimension = HashingEmbeddingProvider::default().dimensions();
    let staging = Arc::new(GatedIndex {
        inner: InMemoryVectorIndex::new("documents", dimension),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let document = Document::new("fresh", "新数据：北京今天下雪。气温零下五度。", "wiki").unwrap();
    let chunks = SentenceChunker::new(50).unwrap().chunk(&document).unwrap();

    let refresh = {
        let pipeline = pipeline.clone();
        let staging: Arc<dyn VectorIndex> = staging.clone();
        tokio::spawn(async move { pipeline.refresh(staging, &chunks).await })
    };

    staging.entered.notified().await;
    let during = pipeline.search("天气", 5).await.unwrap();
    let ids: Vec<&str> = during.iter().map(|r| r.candidate.id.as_str()).collect();
    assert_eq!(ids, vec!["old"]);

    staging.release.notify_one();
    let previous = refresh.await.unwrap().unwrap();
    assert_eq!(previous.count().await.unwrap(), 1);

    let after = pipeline.search("天气", 5).await.unwrap();
    let ids: Vec<&str> = after.iter().map(|r| r.candidate.id.as_str()).collect();
    assert_eq!(ids, vec!["fresh_0"]);
}

#[tokio::test]
async fn writes_wait_for_refresh_to_finish() {
    let pipeline = Arc::new(build(RagConfig::default(), default_index()));
    let dimension = HashingEmbeddingProvider::default().dimensions();
    let staging = Arc::new(GatedIndex {
        inner: InMemoryVectorIndex::new("documents", dimension),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let document = Document::new("fresh", "新数据。", "wiki").unwrap();
    let chunks = SentenceChunker::new(50).unwrap().chunk(&document).unwrap();

    let refresh = {
        let pipeline = pipeline.clone();
        let staging: Arc<dyn VectorIndex> = staging.clone();
        tokio::spawn(async move { pipeline.refresh(staging, &chunks).await })
    };
    staging.entered.notified().await;

    let write = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.add_document("刷新期间写入", None, None).await })
    };
    tokio::task::yield_now().await;
    assert!(!write.is_finished());

    staging.release.notify_one();
    refresh.await.unwrap().unwrap();
    write.await.unwrap().unwrap();

    // The write landed in the swapped-in index, not the discarded one.
    assert_eq!(pipeline.collection_info().await.unwrap().count, 2);
}

#[tokio::test]
async fn cancelled_search_leaves_no_pending_work() {
    let index = Arc::new(CountingIndex::new(HashingEmbeddingProvider::default().dimensions()));
    let pipeline = Arc::new(build(RagConfig::default(), index.clone()));
    pipeline.add_documents(&CAPITALS, None, None).await.unwrap();

    let search = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.search("北京", 3).await })
    };
    search.abort();
    let _ = search.await;

    tokio::task::yield_now().await;
    assert_eq!(index.count().await.unwrap(), 3);
    assert!(index.queries.load(Ordering::SeqCst) <= 1);

    let results = pipeline.search("北京", 3).await.unwrap();
    assert_eq!(results.len(), 3);
}

//! Construction of capabilities from configuration.
//!
//! Each backend enum maps to exactly one constructor here; there is no
//! runtime registration. Backends behind a disabled cargo feature produce a
//! [`RagError::ConfigError`].

use std::sync::Arc;

use tracing::info;

use crate::config::{
    EmbeddingBackend, EmbeddingConfig, IndexBackend, RagConfig, VectorStoreConfig,
};
use crate::chunking::Chunker;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::hashing::{DEFAULT_HASHING_DIMENSION, HashingEmbeddingProvider};
use crate::inmemory::InMemoryVectorIndex;
use crate::pipeline::RagPipeline;
use crate::reranker::BlendedReranker;
use crate::vectorstore::VectorIndex;

/// Build the chunker named by `config.chunking`.
///
/// # Errors
///
/// Returns [`RagError::InvalidArgument`] for a zero chunk size or an overlap
/// that is not smaller than it.
pub fn create_chunker(config: &RagConfig) -> Result<Box<dyn Chunker>> {
    let chunker = config.chunking.chunker()?;
    info!(
        strategy = %chunker.strategy(),
        chunk_size = config.chunking.chunk_size,
        "created chunker"
    );
    Ok(chunker)
}

/// Build the embedding provider named by `config`.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] for a backend compiled out of this build
/// or an invalid dimension, and [`RagError::EmbeddingFailure`] if a remote
/// backend has no API key.
pub fn create_embedding(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbeddingProvider::new(
            config.dimension.unwrap_or(DEFAULT_HASHING_DIMENSION),
        )?),
        EmbeddingBackend::OpenAi => openai_provider(config)?,
    };
    info!(
        provider = provider.name(),
        dimensions = provider.dimensions(),
        "created embedding provider"
    );
    Ok(provider)
}

#[cfg(feature = "openai")]
fn openai_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    use crate::openai::OpenAIEmbeddingProvider;

    let mut provider = match &config.api_key {
        Some(key) => OpenAIEmbeddingProvider::new(key.clone())?,
        None => OpenAIEmbeddingProvider::from_env()?,
    }
    .with_model(config.model_name.clone());
    if let Some(base) = &config.api_base {
        provider = provider.with_api_base(base.clone());
    }
    if let Some(dimension) = config.dimension {
        provider = provider.with_dimensions(dimension);
    }
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "openai"))]
fn openai_provider(_config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(RagError::ConfigError("embedding provider 'openai' requires the `openai` feature".into()))
}

/// Build the vector index named by `config` with a fixed `dimension`.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] for a backend compiled out of this build
/// or a missing server URL, and [`RagError::IndexFailure`] if a remote
/// backend cannot be reached.
pub async fn create_vector_index(
    config: &VectorStoreConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match config.provider {
        IndexBackend::InMemory => {
            Arc::new(InMemoryVectorIndex::new(config.collection_name.clone(), dimension))
        }
        IndexBackend::Chroma => chroma_index(config, dimension).await?,
    };
    info!(
        backend = index.backend(),
        collection = index.collection_name(),
        dimension,
        "created vector index"
    );
    Ok(index)
}

#[cfg(feature = "chroma")]
async fn chroma_index(
    config: &VectorStoreConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorIndex>> {
    use crate::chroma::ChromaVectorIndex;

    let url = config
        .url
        .as_deref()
        .ok_or_else(|| RagError::ConfigError("vector_store.url is required for chroma".into()))?;
    let index = ChromaVectorIndex::connect(url, config.collection_name.clone(), dimension).await?;
    Ok(Arc::new(index))
}

#[cfg(not(feature = "chroma"))]
async fn chroma_index(
    _config: &VectorStoreConfig,
    _dimension: usize,
) -> Result<Arc<dyn VectorIndex>> {
    Err(RagError::ConfigError("vector store 'chroma' requires the `chroma` feature".into()))
}

/// Build a complete [`RagPipeline`] from configuration.
///
/// The index dimension is taken from the embedding provider, and the
/// blended re-ranker is attached when `enable_reranking` is set.
pub async fn create_pipeline(config: &RagConfig) -> Result<RagPipeline> {
    config.validate()?;
    let embedder = create_embedding(&config.embedding)?;
    let index = create_vector_index(&config.vector_store, embedder.dimensions()).await?;

    let mut builder = RagPipeline::builder()
        .config(config.clone())
        .embedding_provider(embedder)
        .vector_index(index);
    if config.enable_reranking {
        builder = builder.reranker(Arc::new(BlendedReranker::new()));
    }
    builder.build()
}

//! Configuration for the RAG pipeline.
//!
//! [`RagConfig`] is plain serde data so it can be loaded from JSON. Use
//! [`RagConfig::builder()`] (or [`RagConfig::validate`] after loading) to get
//! a configuration whose parameters are known to be consistent.

use serde::{Deserialize, Serialize};

use crate::chunking::{ChunkStrategy, Chunker, chunker_for};
use crate::embedding::DEFAULT_BATCH_SIZE;
use crate::error::{RagError, Result};

/// Which embedding capability to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Offline character feature hashing.
    #[default]
    Hashing,
    /// An OpenAI-compatible `/embeddings` endpoint (feature `openai`).
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
}

/// Which vector index to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// A process-local index.
    #[default]
    InMemory,
    /// A ChromaDB server (feature `chroma`).
    #[serde(alias = "chromadb")]
    Chroma,
}

/// Embedding capability settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend to construct.
    pub provider: EmbeddingBackend,
    /// Model identifier passed to remote backends.
    pub model_name: String,
    /// Vector dimension; `None` uses the backend default.
    pub dimension: Option<usize>,
    /// Maximum texts per embedding request during ingestion.
    pub batch_size: usize,
    /// API key for remote backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL for remote backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hashing,
            model_name: "shibing624/text2vec-base-chinese".to_string(),
            dimension: None,
            batch_size: DEFAULT_BATCH_SIZE,
            api_key: None,
            api_base: None,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Backend to construct.
    pub provider: IndexBackend,
    /// Collection name.
    pub collection_name: String,
    /// Server URL for remote backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Whether [`RagPipeline::reset`](crate::pipeline::RagPipeline::reset) is permitted.
    pub allow_reset: bool,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: IndexBackend::InMemory,
            collection_name: "documents".to_string(),
            url: None,
            allow_reset: true,
        }
    }
}

/// Chunking settings used by ingestion collaborators.
///
/// [`chunker`](ChunkingConfig::chunker) turns these settings into the
/// [`Chunker`] that file loading and document ingestion use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Strategy to apply.
    pub strategy: ChunkStrategy,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap in characters (fixed-size strategy only).
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { strategy: ChunkStrategy::Smart, chunk_size: 300, chunk_overlap: 50 }
    }
}

impl ChunkingConfig {
    /// Build the chunker these settings describe.
    ///
    /// `chunk_overlap` only matters for [`ChunkStrategy::FixedSize`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `chunk_size` is zero or the
    /// overlap is not smaller than it.
    pub fn chunker(&self) -> Result<Box<dyn Chunker>> {
        chunker_for(self.strategy, self.chunk_size, self.chunk_overlap)
    }
}

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Embedding capability settings.
    pub embedding: EmbeddingConfig,
    /// Vector index settings.
    pub vector_store: VectorStoreConfig,
    /// Chunking settings.
    pub chunking: ChunkingConfig,
    /// Result count used when the caller does not pass one.
    pub default_search_limit: usize,
    /// Minimum similarity for results; `None` keeps everything.
    pub default_score_threshold: Option<f32>,
    /// Whether searches over-fetch and re-rank.
    pub enable_reranking: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            chunking: ChunkingConfig::default(),
            default_search_limit: 5,
            default_score_threshold: None,
            enable_reranking: false,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Defaults tuned for Chinese text: smart chunking and re-ranking on.
    pub fn default_chinese() -> Self {
        Self { enable_reranking: true, ..Self::default() }
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the JSON is malformed or fails
    /// [`validate`](RagConfig::validate).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RagError::ConfigError(format!("invalid configuration JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RagError::ConfigError(format!("failed to serialize configuration: {e}")))
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunking.chunk_size == 0`
    /// - `chunking.chunk_overlap >= chunking.chunk_size`
    /// - `default_search_limit == 0`
    /// - `embedding.batch_size == 0`
    /// - `embedding.dimension == Some(0)`
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.default_search_limit == 0 {
            return Err(RagError::ConfigError(
                "default_search_limit must be greater than zero".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        if self.embedding.dimension == Some(0) {
            return Err(RagError::ConfigError("dimension must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Replace the embedding settings.
    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    /// Replace the vector index settings.
    pub fn vector_store(mut self, vector_store: VectorStoreConfig) -> Self {
        self.config.vector_store = vector_store;
        self
    }

    /// Set the chunking strategy.
    pub fn chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.config.chunking.strategy = strategy;
        self
    }

    /// Set the target chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunking.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive fixed-size chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunking.chunk_overlap = overlap;
        self
    }

    /// Set the default number of results.
    pub fn default_search_limit(mut self, limit: usize) -> Self {
        self.config.default_search_limit = limit;
        self
    }

    /// Set the default minimum similarity.
    pub fn default_score_threshold(mut self, threshold: f32) -> Self {
        self.config.default_score_threshold = Some(threshold);
        self
    }

    /// Turn re-ranking on or off.
    pub fn enable_reranking(mut self, enabled: bool) -> Self {
        self.config.enable_reranking = enabled;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

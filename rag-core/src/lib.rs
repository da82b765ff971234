//! # rag-core
//!
//! Chunking, retrieval, and re-ranking for retrieval-augmented chat over
//! Chinese (and mixed) text.
//!
//! ## Overview
//!
//! - [`Chunker`] strategies ([`SentenceChunker`], [`FixedSizeChunker`],
//!   [`SmartChunker`]) cut documents into retrievable units.
//! - [`EmbeddingProvider`] and [`VectorIndex`] are the two consumed
//!   capabilities. [`HashingEmbeddingProvider`] and [`InMemoryVectorIndex`]
//!   work offline; `openai` and `chroma` features add HTTP backends.
//! - [`Retriever`] turns a query into similarity-ranked [`Candidate`]s.
//! - [`BlendedReranker`] re-scores candidates with character overlap and a
//!   length preference.
//! - [`RagPipeline`] composes these behind one `search(query, limit)` call.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rag_core::{RagConfig, create_pipeline};
//!
//! let pipeline = create_pipeline(&RagConfig::default_chinese()).await?;
//! pipeline
//!     .add_documents(&["中国的首都是北京", "法国的首都是巴黎"], None, None)
//!     .await?;
//! let results = pipeline.search("北京是哪个国家的首都", 1).await?;
//! ```
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `openai` | OpenAI-compatible `/embeddings` provider |
//! | `chroma` | ChromaDB REST vector index |
//! | `full` | Both of the above |

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod factory;
pub mod hashing;
pub mod inmemory;
pub mod loader;
pub mod pipeline;
pub mod reranker;
pub mod retriever;
pub mod vectorstore;

#[cfg(feature = "chroma")]
pub mod chroma;
#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{
    ChunkStrategy, Chunker, FixedSizeChunker, SentenceChunker, SmartChunker, chunk_text,
    chunker_for, normalize_line_endings,
};
pub use config::{
    ChunkingConfig, EmbeddingBackend, EmbeddingConfig, IndexBackend, RagConfig, RagConfigBuilder,
    VectorStoreConfig,
};
pub use document::{
    Candidate, Chunk, Document, IndexedRecord, Metadata, RankedResult, SearchResult,
};
pub use embedding::{DEFAULT_BATCH_SIZE, EmbeddingProvider, validate_embedding};
pub use error::{RagError, Result};
pub use factory::{create_chunker, create_embedding, create_pipeline, create_vector_index};
pub use hashing::HashingEmbeddingProvider;
pub use inmemory::InMemoryVectorIndex;
pub use loader::{chunk_file, chunk_files, chunk_files_with, load_document, load_text_file};
pub use pipeline::{
    CollectionInfo, CollectionState, RagPipeline, RagPipelineBuilder, SearchOptions,
};
pub use reranker::{BlendedReranker, Reranker, keyword_overlap, length_score};
pub use retriever::Retriever;
pub use vectorstore::{QueryHit, VectorIndex};

#[cfg(feature = "chroma")]
pub use chroma::ChromaVectorIndex;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;

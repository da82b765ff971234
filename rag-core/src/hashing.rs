//! Deterministic character feature-hashing embeddings.
//!
//! [`HashingEmbeddingProvider`] needs no model download or network access.
//! Each non-whitespace character is hashed with FNV-1a into one of
//! `dimension` buckets, and the bucket counts are L2-normalized. Cosine
//! similarity between two such vectors approximates character overlap, which
//! is a usable baseline for CJK text where word boundaries are ambiguous.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Default number of hash buckets.
pub const DEFAULT_HASHING_DIMENSION: usize = 256;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME))
}

/// An [`EmbeddingProvider`] that hashes characters into a fixed-size vector.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing `dimension`-length vectors.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::ConfigError(
                "embedding dimension must be greater than zero".into(),
            ));
        }
        Ok(Self { dimension })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut buf = [0u8; 4];
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            let bucket = fnv1a(c.encode_utf8(&mut buf).as_bytes()) % self.dimension as u64;
            vector[bucket as usize] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self { dimension: DEFAULT_HASHING_DIMENSION }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}

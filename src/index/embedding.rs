use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::index::error::IndexResult;
use crate::index::tokenizer::tokenize;

/// Longest input the oracle is asked to embed; longer text is truncated.
pub const MAX_EMBED_CHARS: usize = 5_000;

/// Capability that turns text into a fixed-length vector. The core never
/// encodes a model choice beyond the dimension detected at startup; the
/// sync apply path calls this for every note it materialises, so providers
/// MUST be deterministic across devices or content hashes diverge.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>>;
}

/// Deterministic hashed bag-of-words embedding.
///
/// Each token is lower-cased and hashed into a bucket with a hash-derived
/// sign, and the accumulated vector is L2-normalised. Not a semantic model,
/// but stable across devices and platforms, which makes it the default
/// oracle for installations without a real model attached.
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub const DEFAULT_DIMENSION: usize = 128;

    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        let truncated: String = text.chars().take(MAX_EMBED_CHARS).collect();
        let mut vector = vec![0.0_f32; self.dimension];

        for token in tokenize(&truncated) {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket =
                (u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
                    % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let provider = HashEmbedding::default();
        let a = provider.embed("apples and oranges").await.unwrap();
        let b = provider.embed("apples and oranges").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HashEmbedding::DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn non_empty_text_yields_a_unit_vector() {
        let provider = HashEmbedding::new(64);
        let vector = provider.embed("some note body").await.unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_yields_the_zero_vector() {
        let provider = HashEmbedding::new(16);
        let vector = provider.embed("").await.unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn case_is_folded_before_hashing() {
        let provider = HashEmbedding::default();
        let lower = provider.embed("meeting notes").await.unwrap();
        let upper = provider.embed("MEETING NOTES").await.unwrap();
        assert_eq!(lower, upper);
    }
}

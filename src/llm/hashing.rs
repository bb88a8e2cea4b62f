//! Local Embeddings using Feature Hashing
//!
//! Offline embedder for development and tests. Uses the hashing trick to
//! produce fixed-size vectors without a vocabulary: the same text always
//! maps to the same vector, whatever else has been embedded.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{Embedder, Embedding, EmbeddingError};

/// Default dimensionality of hashed vectors.
pub const DEFAULT_DIMENSION: usize = 256;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    /// Term-frequency vector over hashed, lowercased tokens, L2-normalized.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut tf = vec![0.0f32; self.dimension];

        let tokens = text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty());
        for token in tokens {
            tf[self.bucket(&token.to_lowercase())] += 1.0;
        }

        let norm: f32 = tf.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut tf {
                *x /= norm;
            }
        }
        tf
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.embed_text(text))
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::index::cosine_similarity;

    #[test]
    fn test_dimension() {
        assert_eq!(HashingEmbedder::new(64).embed_text("Hello world").len(), 64);
    }

    #[test]
    fn test_embedding_stability() {
        let embedder = HashingEmbedder::default();
        let first = embedder.embed_text("The quick brown fox");
        let _ = embedder.embed_text("completely different words zebra giraffe quantum");
        assert_eq!(first, embedder.embed_text("The quick brown fox"));
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("The sky is blue.");
        let b = embedder.embed_text("the SKY is blue");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let embedder = HashingEmbedder::default();
        assert!(matches!(embedder.embed_query("  ").await, Err(EmbeddingError::EmptyInput)));
    }
}

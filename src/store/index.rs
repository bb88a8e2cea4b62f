//! In-Memory Vector Index
//!
//! Brute-force cosine search over one knowledge base's chunk embeddings.
//! Read-only once built; share it behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::IndexError;
use crate::documents::Chunk;
use crate::llm::Embedding;

/// Bumped whenever the persisted layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// A chunk with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Embedding,
}

/// Search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity, -1.0 to 1.0 (higher is more similar)
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub format_version: u32,
    pub name: String,
    /// Build that produced this index; changes on every rebuild
    pub generation: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
    /// Entries in insertion order
    pub entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Pair chunks with their vectors. All vectors must share one dimension.
    pub fn from_parts(
        name: &str,
        generation: &str,
        embedding_model: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Embedding>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::LengthMismatch { chunks: chunks.len(), vectors: vectors.len() });
        }
        let dimension = match vectors.first() {
            Some(v) => v.len(),
            None => return Err(IndexError::Empty),
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch { expected: dimension, got: bad.len() });
        }

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        Ok(Self {
            format_version: FORMAT_VERSION,
            name: name.to_string(),
            generation: generation.to_string(),
            embedding_model: embedding_model.to_string(),
            dimension,
            created_at: Utc::now(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k chunks by descending similarity; ties keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch { expected: self.dimension, got: vector.len() });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(vector, &entry.vector)))
            .collect();

        // sort_by is stable, so equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk { chunk: self.entries[i].chunk.clone(), score })
            .collect())
    }
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

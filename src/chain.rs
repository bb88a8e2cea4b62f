//! Retrieval-Augmented Answer Chain
//!
//! One pass per question: embed the query, take the top-k chunks of a single
//! knowledge base, stuff them into one prompt, and make exactly one
//! generation call.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::llm::{Embedder, EmbeddingError, GenerationError, Generator};
use crate::store::{IndexError, ScoredChunk, VectorIndex};

/// Separator between retrieved chunks in the context block.
const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("{0}")]
    Embedding(#[from] EmbeddingError),
    #[error("{0}")]
    Index(#[from] IndexError),
    #[error("{0}")]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Clone, Copy)]
pub struct ChainSettings {
    pub top_k: usize,
    pub temperature: f32,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            top_k: crate::config::DEFAULT_TOP_K,
            temperature: crate::config::DEFAULT_TEMPERATURE,
        }
    }
}

/// Where a piece of retrieved context came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub ordinal: u32,
    pub score: f32,
}

impl From<&ScoredChunk> for SourceRef {
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            source: hit.chunk.source.clone(),
            page: hit.chunk.page,
            ordinal: hit.chunk.ordinal,
            score: hit.score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Retrieved context, best match first
    pub sources: Vec<SourceRef>,
}

/// A loaded knowledge base bound to its models.
pub struct RagChain {
    name: String,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    settings: ChainSettings,
}

impl RagChain {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        settings: ChainSettings,
    ) -> Self {
        Self {
            name: index.name.clone(),
            index,
            embedder,
            generator,
            settings,
        }
    }

    /// Build the index was loaded from.
    pub fn generation(&self) -> &str {
        &self.index.generation
    }

    /// Top-k chunks for `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>, ChainError> {
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.index.query(&vector, self.settings.top_k)?;
        debug!(kb = %self.name, hits = hits.len(), "Retrieved context");
        Ok(hits)
    }

    /// Generate an answer from already-retrieved context.
    pub async fn synthesize(&self, query: &str, context: &[ScoredChunk]) -> Result<Answer, ChainError> {
        let prompt = build_prompt(query, context);
        let text = self.generator.generate(&prompt, self.settings.temperature).await?;
        Ok(Answer {
            text: text.trim().to_string(),
            sources: context.iter().map(SourceRef::from).collect(),
        })
    }
}

/// "Stuff" prompt: every retrieved chunk inlined ahead of the question.
pub fn build_prompt(query: &str, context: &[ScoredChunk]) -> String {
    let block = context
        .iter()
        .map(|hit| hit.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {block}\n\n\
         Question: {query}\n\
         Helpful Answer:"
    )
}

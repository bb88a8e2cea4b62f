//! Ingestion Pipeline
//!
//! Offline full rebuild: load documents, chunk, embed, persist. Two modes:
//!
//! - `Combined`: every document goes into one knowledge base. Any failure
//!   aborts the run and leaves the previous build live.
//! - `PerSource`: one knowledge base per source file, named from the file
//!   stem. A failing file is logged and skipped.

use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::documents::{self, ChunkerError, LoaderError};
use crate::llm::{Embedder, EmbeddingError};
use crate::store::{sanitize_name, validate_name, IndexError, KnowledgeBaseInfo, KnowledgeBaseStore};

/// Knowledge-base name used by combined ingestion when none is given.
pub const DEFAULT_KB_NAME: &str = "default";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No documents found in {0}")]
    NoDocuments(String),
    #[error("Could not derive a knowledge base name from {0}")]
    InvalidName(String),
    #[error("Duplicate knowledge base name {name} (from {source_path})")]
    DuplicateName { name: String, source_path: String },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Chunker(#[from] ChunkerError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestMode {
    Combined { name: String },
    PerSource,
}

impl Default for IngestMode {
    fn default() -> Self {
        IngestMode::Combined { name: DEFAULT_KB_NAME.to_string() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct IngestReport {
    pub built: Vec<KnowledgeBaseInfo>,
    pub failures: Vec<IngestFailure>,
}

pub struct Ingestor {
    store: Arc<KnowledgeBaseStore>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    overlap: usize,
}

impl Ingestor {
    pub fn new(
        store: Arc<KnowledgeBaseStore>,
        embedder: Arc<dyn Embedder>,
        chunk_size: usize,
        overlap: usize,
    ) -> Self {
        Self { store, embedder, chunk_size, overlap }
    }

    pub async fn run(&self, documents_dir: &Path, mode: &IngestMode) -> Result<IngestReport, IngestError> {
        match mode {
            IngestMode::Combined { name } => self.run_combined(documents_dir, name).await,
            IngestMode::PerSource => self.run_per_source(documents_dir).await,
        }
    }

    async fn run_combined(&self, dir: &Path, name: &str) -> Result<IngestReport, IngestError> {
        crate::store::validate_name(name)?;
        let documents = documents::load_directory(dir)?;
        if documents.is_empty() {
            return Err(IngestError::NoDocuments(dir.display().to_string()));
        }
        info!(documents = documents.len(), kb = %name, "Loaded documents");

        let info = self
            .build(name, &documents)
            .await
            .inspect_err(|e| error!(kb = %name, error = %e, "Ingestion aborted"))?;
        Ok(IngestReport { built: vec![info], failures: Vec::new() })
    }

    async fn run_per_source(&self, dir: &Path) -> Result<IngestReport, IngestError> {
        let files = documents::list_source_files(dir)?;
        if files.is_empty() {
            return Err(IngestError::NoDocuments(dir.display().to_string()));
        }

        let mut report = IngestReport::default();
        let mut seen = HashSet::new();
        for path in files {
            let source = path.display().to_string();
            match self.ingest_source(&path, &mut seen).await {
                Ok(info) => report.built.push(info),
                Err(e) => {
                    error!(source = %source, error = %e, "Skipping source");
                    report.failures.push(IngestFailure { source, error: e.to_string() });
                }
            }
        }

        info!(built = report.built.len(), failed = report.failures.len(), "Ingestion finished");
        Ok(report)
    }

    async fn ingest_source(&self, path: &Path, seen: &mut HashSet<String>) -> Result<KnowledgeBaseInfo, IngestError> {
        let source = path.display().to_string();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = sanitize_name(&stem)
            .filter(|name| validate_name(name).is_ok())
            .ok_or_else(|| IngestError::InvalidName(source.clone()))?;
        if !seen.insert(name.clone()) {
            return Err(IngestError::DuplicateName { name, source_path: source });
        }

        let documents = documents::load_file(path)?;
        if documents.is_empty() {
            return Err(IngestError::NoDocuments(source));
        }
        self.build(&name, &documents).await
    }

    async fn build(&self, name: &str, docs: &[documents::Document]) -> Result<KnowledgeBaseInfo, IngestError> {
        let chunks = documents::split_all(docs, self.chunk_size, self.overlap)?;
        if chunks.is_empty() {
            return Err(IngestError::NoDocuments(name.to_string()));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        info!(kb = %name, chunks = chunks.len(), "Embedded chunks");

        Ok(self.store.build(name, self.embedder.model_name(), chunks, vectors)?)
    }
}

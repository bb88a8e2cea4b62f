//! Knowledge Base Registry
//!
//! Enumerates the knowledge bases present under the storage root. The scan
//! result is cached for a short TTL; `invalidate` forces the next `list` to
//! rescan, which is what makes a fresh ingestion routable without a restart.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::store::{IndexError, KnowledgeBaseStore};

pub struct KnowledgeBaseRegistry {
    store: Arc<KnowledgeBaseStore>,
    ttl: Duration,
    cached: RwLock<Option<(Instant, Vec<String>)>>,
}

impl KnowledgeBaseRegistry {
    pub fn new(store: Arc<KnowledgeBaseStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Sorted names of every knowledge base with a live build.
    pub fn list(&self) -> Result<Vec<String>, IndexError> {
        if let Some((at, names)) = self.cached.read().as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(names.clone());
            }
        }

        let names = self.store.list()?;
        debug!(count = names.len(), "Rescanned knowledge bases");
        *self.cached.write() = Some((Instant::now(), names.clone()));
        Ok(names)
    }

    pub fn contains(&self, name: &str) -> Result<bool, IndexError> {
        Ok(self.list()?.iter().any(|n| n == name))
    }

    /// Drop the cached scan.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{split, Document};
    use crate::llm::HashingEmbedder;

    fn build(store: &KnowledgeBaseStore, name: &str) {
        let chunks = split(&Document::new("a.txt", None, "Some indexed text."), 100, 10).unwrap();
        let embedder = HashingEmbedder::new(16);
        let vectors = chunks.iter().map(|c| embedder.embed_text(&c.content)).collect();
        store.build(name, "hash", chunks, vectors).unwrap();
    }

    #[test]
    fn test_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeBaseStore::new(dir.path()));
        let registry = KnowledgeBaseRegistry::new(store.clone(), Duration::from_secs(3600));

        assert!(registry.list().unwrap().is_empty());
        build(&store, "hyundai");
        // Still served from the cached scan
        assert!(registry.list().unwrap().is_empty());

        registry.invalidate();
        assert_eq!(registry.list().unwrap(), vec!["hyundai"]);
        assert!(registry.contains("hyundai").unwrap());
        assert!(!registry.contains("mercedes").unwrap());
    }

    #[test]
    fn test_zero_ttl_always_rescans() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeBaseStore::new(dir.path()));
        let registry = KnowledgeBaseRegistry::new(store.clone(), Duration::ZERO);

        assert!(registry.list().unwrap().is_empty());
        build(&store, "jekyll");
        build(&store, "hyundai");
        assert_eq!(registry.list().unwrap(), vec!["hyundai", "jekyll"]);
    }
}

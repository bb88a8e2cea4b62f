//! Persisted Knowledge Bases
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<name>/CURRENT              generation id of the live index
//! <root>/<name>/<generation>/index.json
//! ```
//!
//! A rebuild writes a complete new generation, then swaps `CURRENT` with an
//! atomic rename, so readers in any process see either the old index or the
//! new one, never a partial write. Within one process a per-name lock also
//! keeps `build` exclusive against `open`.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::index::{VectorIndex, FORMAT_VERSION};
use super::{validate_name, IndexError};
use crate::documents::Chunk;
use crate::llm::Embedding;

const CURRENT_FILE: &str = "CURRENT";
const INDEX_FILE: &str = "index.json";

/// Summary of a persisted knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseInfo {
    pub name: String,
    pub generation: String,
    pub chunk_count: usize,
    pub dimension: usize,
    pub embedding_model: String,
}

impl From<&VectorIndex> for KnowledgeBaseInfo {
    fn from(index: &VectorIndex) -> Self {
        Self {
            name: index.name.clone(),
            generation: index.generation.clone(),
            chunk_count: index.len(),
            dimension: index.dimension,
            embedding_model: index.embedding_model.clone(),
        }
    }
}

/// File-backed store of named vector indices
pub struct KnowledgeBaseStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl KnowledgeBaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Persist `chunks`/`vectors` as the knowledge base `name`, replacing
    /// any previous build of that name entirely.
    pub fn build(
        &self,
        name: &str,
        embedding_model: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Embedding>,
    ) -> Result<KnowledgeBaseInfo, IndexError> {
        validate_name(name)?;
        let generation = Ulid::new().to_string();
        let index = VectorIndex::from_parts(name, &generation, embedding_model, chunks, vectors)?;

        let lock = self.lock_for(name);
        let _guard = lock.write();

        let kb_dir = self.root.join(name);
        fs::create_dir_all(&kb_dir)?;

        // Write the whole generation under a hidden name, then reveal it.
        let staging = kb_dir.join(format!(".staging-{}", generation));
        fs::create_dir_all(&staging)?;
        fs::write(staging.join(INDEX_FILE), serde_json::to_vec(&index)?)?;
        fs::rename(&staging, kb_dir.join(&generation))?;

        atomic_write(&kb_dir.join(CURRENT_FILE), &generation)?;
        remove_stale_generations(&kb_dir, &generation);

        info!(name = %name, generation = %generation, chunks = index.len(), "Built knowledge base");
        Ok(KnowledgeBaseInfo::from(&index))
    }

    /// Load the live index of `name`.
    pub fn open(&self, name: &str) -> Result<VectorIndex, IndexError> {
        validate_name(name)?;
        let lock = self.lock_for(name);
        let _guard = lock.read();

        let generation = self
            .current_generation(name)?
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;
        self.open_generation(name, &generation)
    }

    /// Read `generation`. Another process may have swapped `CURRENT` and
    /// removed it since it was read; then the new live generation is read once.
    fn open_generation(&self, name: &str, generation: &str) -> Result<VectorIndex, IndexError> {
        match self.read_generation(name, generation) {
            Err(e) if e.is_not_found() => match self.current_generation(name)? {
                Some(current) if current != generation => {
                    debug!(name = %name, old = %generation, new = %current, "Generation vanished during open, retrying");
                    self.read_generation(name, &current)
                }
                _ => Err(e),
            },
            other => other,
        }
    }

    fn read_generation(&self, name: &str, generation: &str) -> Result<VectorIndex, IndexError> {
        let path = self.root.join(name).join(generation).join(INDEX_FILE);
        let bytes = fs::read(&path)?;
        let index: VectorIndex = serde_json::from_slice(&bytes)?;

        if index.format_version != FORMAT_VERSION {
            return Err(IndexError::Corrupt {
                name: name.to_string(),
                reason: format!("unsupported format version {}", index.format_version),
            });
        }
        if index.name != name || index.generation != generation {
            return Err(IndexError::Corrupt {
                name: name.to_string(),
                reason: "index header does not match its location".to_string(),
            });
        }
        debug!(name = %name, generation = %generation, chunks = index.len(), "Opened knowledge base");
        Ok(index)
    }

    /// Generation id of the live build, if one exists.
    pub fn current_generation(&self, name: &str) -> Result<Option<String>, IndexError> {
        validate_name(name)?;
        match fs::read_to_string(self.root.join(name).join(CURRENT_FILE)) {
            Ok(s) => {
                let generation = s.trim().to_string();
                Ok((!generation.is_empty()).then_some(generation))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of every knowledge base with a live, readable generation.
    pub fn list(&self) -> Result<Vec<String>, IndexError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_name(&name).is_err() {
                continue;
            }
            match self.current_generation(&name) {
                Ok(Some(generation)) if entry.path().join(&generation).join(INDEX_FILE).is_file() => {
                    names.push(name);
                }
                Ok(_) => {}
                Err(e) => warn!(name = %name, error = %e, "Skipping unreadable knowledge base"),
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Atomic write: write to a .tmp sibling then rename into place.
fn atomic_write(path: &Path, contents: &str) -> Result<(), IndexError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Best-effort removal of generations other than `keep`.
fn remove_stale_generations(kb_dir: &Path, keep: &str) {
    let Ok(entries) = fs::read_dir(kb_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == keep || Ulid::from_string(&name).is_err() {
            continue;
        }
        if let Err(e) = fs::remove_dir_all(entry.path()) {
            warn!(path = %entry.path().display(), error = %e, "Failed to remove stale generation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{split, Document};
    use crate::llm::HashingEmbedder;

    fn corpus(text: &str) -> (Vec<Chunk>, Vec<Embedding>) {
        let chunks = split(&Document::new("doc.txt", None, text), 40, 8).unwrap();
        let embedder = HashingEmbedder::new(32);
        let vectors = chunks.iter().map(|c| embedder.embed_text(&c.content)).collect();
        (chunks, vectors)
    }

    #[test]
    fn test_build_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let (chunks, vectors) = corpus("The sky is blue. Grass is green. Snow is white.");
        let expected = chunks.len();

        let info = store.build("colors", "hash", chunks, vectors).unwrap();
        assert_eq!(info.chunk_count, expected);

        let index = store.open("colors").unwrap();
        assert_eq!(index.len(), expected);
        assert_eq!(index.generation, info.generation);
        assert_eq!(store.list().unwrap(), vec!["colors"]);
    }

    #[test]
    fn test_rebuild_replaces_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let text = "One fish two fish red fish blue fish. ".repeat(10);

        let (chunks, vectors) = corpus(&text);
        let first = store.build("fish", "hash", chunks, vectors).unwrap();
        let (chunks, vectors) = corpus(&text);
        let fresh_count = chunks.len();
        let second = store.build("fish", "hash", chunks, vectors).unwrap();

        assert_ne!(first.generation, second.generation);
        let index = store.open("fish").unwrap();
        assert_eq!(index.len(), fresh_count);
        assert_eq!(index.generation, second.generation);
        assert!(!dir.path().join("fish").join(&first.generation).exists());
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let err = store.open("nothing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let store = KnowledgeBaseStore::new("/definitely/not/a/real/root");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_skips_incomplete_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let (chunks, vectors) = corpus("Some text for the index.");
        store.build("ready", "hash", chunks, vectors).unwrap();

        fs::create_dir_all(dir.path().join("half_built")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("stray.txt"), "x").unwrap();

        assert_eq!(store.list().unwrap(), vec!["ready"]);
    }

    #[test]
    fn test_indices_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let (a_chunks, a_vectors) = corpus("Hyundai warranty covers the powertrain.");
        let (b_chunks, b_vectors) = corpus("Jekyll transforms into Hyde at night.");
        store.build("hyundai", "hash", a_chunks, a_vectors).unwrap();
        store.build("jekyll", "hash", b_chunks, b_vectors).unwrap();

        let index = store.open("hyundai").unwrap();
        let query = HashingEmbedder::new(32).embed_text("Jekyll Hyde night");
        for hit in index.query(&query, 10).unwrap() {
            assert!(!hit.chunk.content.contains("Jekyll"));
        }
    }

    #[test]
    fn test_open_follows_current_after_generation_vanishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let (chunks, vectors) = corpus("Old text about tyres.");
        let old = store.build("cars", "hash", chunks, vectors).unwrap();
        let (chunks, vectors) = corpus("New text about brakes.");
        let new = store.build("cars", "hash", chunks, vectors).unwrap();
        assert!(!dir.path().join("cars").join(&old.generation).exists());

        // A reader that saw the old CURRENT before the swap
        let index = store.open_generation("cars", &old.generation).unwrap();
        assert_eq!(index.generation, new.generation);
    }

    #[test]
    fn test_open_live_generation_removed_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let (chunks, vectors) = corpus("Some text.");
        let info = store.build("cars", "hash", chunks, vectors).unwrap();
        fs::remove_dir_all(dir.path().join("cars").join(&info.generation)).unwrap();

        assert!(store.open("cars").unwrap_err().is_not_found());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_open_during_rebuilds_always_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let text = "Rebuilt over and over while being read. ".repeat(5);
        let (chunks, vectors) = corpus(&text);
        store.build("busy", "hash", chunks, vectors).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..20 {
                    let (chunks, vectors) = corpus(&text);
                    store.build("busy", "hash", chunks, vectors).unwrap();
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let index = store.open("busy").unwrap();
                        assert!(!index.is_empty());
                    }
                });
            }
        });
    }

    #[test]
    fn test_invalid_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        let (chunks, vectors) = corpus("text");
        assert!(matches!(
            store.build("../escape", "hash", chunks, vectors),
            Err(IndexError::InvalidName(_))
        ));
    }
}

//! Knowledge Base Storage
//!
//! One persisted vector index per knowledge base, each isolated in its own
//! directory under the storage root.

pub mod index;
pub mod persist;

use thiserror::Error;

pub use index::{cosine_similarity, IndexEntry, ScoredChunk, VectorIndex};
pub use persist::{KnowledgeBaseInfo, KnowledgeBaseStore};

/// Longest accepted knowledge-base name.
pub const MAX_NAME_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Knowledge base not found: {0}")]
    NotFound(String),
    #[error("Invalid knowledge base name: {0:?}")]
    InvalidName(String),
    #[error("Got {chunks} chunks but {vectors} vectors")]
    LengthMismatch { chunks: usize, vectors: usize },
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Cannot build an empty knowledge base")]
    Empty,
    #[error("Corrupt knowledge base {name}: {reason}")]
    Corrupt { name: String, reason: String },
}

impl IndexError {
    /// Whether the error means "nothing has been ingested under this name".
    pub fn is_not_found(&self) -> bool {
        match self {
            IndexError::NotFound(_) => true,
            IndexError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Validate that a knowledge-base name is safe to use as a directory name.
/// Allows alphanumerics, dash and underscore; must start alphanumeric. The
/// router's no-match word is reserved.
pub fn validate_name(name: &str) -> Result<(), IndexError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.eq_ignore_ascii_case(crate::router::NO_MATCH)
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidName(name.to_string()))
    }
}

/// Derive a knowledge-base name from free text such as a file stem.
/// Lowercases, maps every other character run to `_`, and trims.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }

    let trimmed: String = name
        .trim_matches('_')
        .chars()
        .take(MAX_NAME_LEN)
        .collect();
    let trimmed = trimmed.trim_end_matches('_').to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("hyundai").is_ok());
        assert!(validate_name("owner_manual-2024").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("_leading").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
        assert!(validate_name("none").is_err());
        assert!(validate_name("NONE").is_err());
        assert!(validate_name("nonesuch").is_ok());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Hyundai Owner's Manual (2024)").as_deref(), Some("hyundai_owner_s_manual_2024"));
        assert_eq!(sanitize_name("Mercedes").as_deref(), Some("mercedes"));
        assert_eq!(sanitize_name("  --  ").as_deref(), None);
        assert_eq!(sanitize_name("Dr. Jekyll & Mr. Hyde").as_deref(), Some("dr_jekyll_mr_hyde"));
        let long = sanitize_name(&"x".repeat(100)).unwrap();
        assert_eq!(long.len(), MAX_NAME_LEN);
        assert!(validate_name(&long).is_ok());
    }
}

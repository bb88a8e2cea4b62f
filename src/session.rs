//! Chat Sessions
//!
//! An ordered list of `{role, content}` turns per conversation. Each user
//! turn produces exactly one assistant turn. Turns are never fed back into
//! retrieval; every question is answered on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use ulid::Ulid;

use crate::service::QueryService;

const SESSION_FILE: &str = "session.json";
const SESSION_PREFIX: &str = "sess_";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Invalid session ID")]
    InvalidSessionId,
}

/// Validate that a session ID contains only safe characters (alphanumeric, dash, underscore).
/// Rejects any path traversal attempts (/, \, ..).
pub fn validate_session_id(session_id: &str) -> Result<(), SessionError> {
    if !session_id.is_empty() && session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(SessionError::InvalidSessionId)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
    /// Knowledge base that answered (assistant turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
}

/// Persisted to `sess_<id>/session.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new().to_string(),
            created: now,
            updated: now,
            turns: Vec::new(),
        }
    }

    /// Append a user turn and the service's reply to it; returns the reply turn.
    pub async fn exchange(&mut self, service: &QueryService, message: &str) -> &Turn {
        self.push(Role::User, message.to_string(), None);
        let reply = service.handle(message).await;
        self.push(Role::Assistant, reply.text, reply.knowledge_base)
    }

    fn push(&mut self, role: Role, content: String, knowledge_base: Option<String>) -> &Turn {
        let now = Utc::now();
        self.updated = now;
        self.turns.push(Turn { role, content, at: now, knowledge_base });
        &self.turns[self.turns.len() - 1]
    }
}

/// Atomic write: write to a .tmp sibling then rename into place.
/// Prevents corruption if the process crashes mid-write.
fn atomic_write(path: &Path, contents: &str) -> Result<(), SessionError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Directory of persisted chat sessions
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Session directory; accepts the id with or without the `sess_` prefix.
    fn session_dir(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        let normalized = session_id.trim_start_matches(SESSION_PREFIX);
        validate_session_id(normalized)?;
        Ok(self.dir.join(format!("{}{}", SESSION_PREFIX, normalized)))
    }

    pub fn save(&self, session: &ChatSession) -> Result<(), SessionError> {
        let session_dir = self.session_dir(&session.id)?;
        fs::create_dir_all(&session_dir)?;
        let content = serde_json::to_string_pretty(session)?;
        atomic_write(&session_dir.join(SESSION_FILE), &content)
    }

    pub fn load(&self, session_id: &str) -> Result<ChatSession, SessionError> {
        let session_path = self.session_dir(session_id)?.join(SESSION_FILE);
        if !session_path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let content = fs::read_to_string(&session_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// All readable sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<ChatSession>, SessionError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path().join(SESSION_FILE);
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path).map_err(SessionError::from).and_then(|content| {
                serde_json::from_str::<ChatSession>(&content).map_err(SessionError::from)
            }) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = ?path, error = %e, "Failed to read session"),
            }
        }

        sessions.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(sessions)
    }

    pub fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let session_dir = self.session_dir(session_id)?;
        if !session_dir.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        fs::remove_dir_all(&session_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::router::tests::ScriptedGenerator;
    use crate::service::{ServiceMode, NOT_READY_REPLY};
    use crate::store::KnowledgeBaseStore;
    use std::sync::Arc;

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("01HZX3").is_ok());
        assert!(validate_session_id("a-b_c").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../x").is_err());
        assert!(validate_session_id("a/b").is_err());
    }

    #[tokio::test]
    async fn test_each_user_turn_gets_one_reply() {
        let root = tempfile::tempdir().unwrap();
        let service = QueryService::new(
            ServiceMode::Routed,
            Arc::new(KnowledgeBaseStore::new(root.path())),
            Arc::new(HashingEmbedder::default()),
            Arc::new(ScriptedGenerator::fixed("unused")),
        );

        let mut session = ChatSession::new();
        let reply = session.exchange(&service, "Hello?").await.clone();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, NOT_READY_REPLY);
        session.exchange(&service, "Anyone there?").await;

        let roles: Vec<Role> = session.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(session.turns[2].content, "Anyone there?");
    }

    #[test]
    fn test_save_load_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let mut older = ChatSession::new();
        older.push(Role::User, "first".into(), None);
        store.save(&older).unwrap();
        let mut newer = ChatSession::new();
        newer.push(Role::User, "second".into(), None);
        newer.updated = older.updated + chrono::Duration::seconds(1);
        store.save(&newer).unwrap();

        let loaded = store.load(&format!("sess_{}", older.id)).unwrap();
        assert_eq!(loaded.turns, older.turns);

        let listed: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![newer.id.clone(), older.id.clone()]);

        store.delete(&older.id).unwrap();
        assert!(matches!(store.load(&older.id), Err(SessionError::NotFound(_))));
        assert!(matches!(store.load("../etc"), Err(SessionError::InvalidSessionId)));
    }

    #[test]
    fn test_list_skips_corrupt_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&ChatSession::new()).unwrap();
        fs::create_dir_all(dir.path().join("sess_broken")).unwrap();
        fs::write(dir.path().join("sess_broken").join(SESSION_FILE), "{not json").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let store = SessionStore::new("/definitely/not/here");
        assert!(store.list().unwrap().is_empty());
    }
}

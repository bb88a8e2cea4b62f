//! Runtime Configuration
//!
//! Everything is environment-provided, with a `.env` file in the working
//! directory as fallback. The provider credential is mandatory: a process
//! must fail here, before it ever accepts a request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the provider credential.
pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Upper bound on texts per batch embedding request.
pub const DEFAULT_EMBED_BATCH: usize = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_REGISTRY_TTL_SECS: u64 = 5;
pub const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// Dotenv file read from the working directory.
pub const ENV_FILE: &str = ".env";

const APP_DIR: &str = "corpora";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set; export it or add it to the .env file")]
    MissingCredential(&'static str),
    #[error("Could not read {path}: {reason}")]
    EnvFile { path: String, reason: String },
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("Could not determine a data directory; set {0}")]
    NoDataDir(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_base: String,
    pub embedding_model: String,
    pub generation_model: String,
    pub storage_root: PathBuf,
    pub documents_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub temperature: f32,
    pub embed_batch: usize,
    pub timeout: Duration,
    pub cache_capacity: Option<usize>,
    pub registry_ttl: Duration,
    pub bind: String,
    /// Serve this knowledge base only instead of routing
    pub knowledge_base: Option<String>,
}

impl Config {
    /// Read configuration from the process environment and `./.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_and_file(|key| std::env::var(key).ok(), Path::new(ENV_FILE))
    }

    /// Values from `env` win; the dotenv file at `path` fills the gaps. A
    /// missing file is not an error.
    pub fn from_env_and_file<F>(env: F, path: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = read_env_file(path)?;
        Self::from_lookup(|key| {
            env(key)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| file.get(key).cloned())
        })
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get(API_KEY_VAR).ok_or(ConfigError::MissingCredential(API_KEY_VAR))?;

        let storage_root = match get("CORPORA_STORAGE_ROOT") {
            Some(p) => PathBuf::from(p),
            None => default_data_path("knowledge-bases", "CORPORA_STORAGE_ROOT")?,
        };
        let sessions_dir = match get("CORPORA_SESSIONS_DIR") {
            Some(p) => PathBuf::from(p),
            None => default_data_path("sessions", "CORPORA_SESSIONS_DIR")?,
        };

        let config = Self {
            api_key: api_key.trim().to_string(),
            api_base: get("CORPORA_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            embedding_model: get("CORPORA_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            generation_model: get("CORPORA_GENERATION_MODEL")
                .unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
            storage_root,
            documents_dir: get("CORPORA_DOCUMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("documents")),
            sessions_dir,
            chunk_size: parse_or("CORPORA_CHUNK_SIZE", get("CORPORA_CHUNK_SIZE"), DEFAULT_CHUNK_SIZE)?,
            chunk_overlap: parse_or(
                "CORPORA_CHUNK_OVERLAP",
                get("CORPORA_CHUNK_OVERLAP"),
                DEFAULT_CHUNK_OVERLAP,
            )?,
            top_k: parse_or("CORPORA_TOP_K", get("CORPORA_TOP_K"), DEFAULT_TOP_K)?,
            temperature: parse_or(
                "CORPORA_TEMPERATURE",
                get("CORPORA_TEMPERATURE"),
                DEFAULT_TEMPERATURE,
            )?,
            embed_batch: parse_or("CORPORA_EMBED_BATCH", get("CORPORA_EMBED_BATCH"), DEFAULT_EMBED_BATCH)?,
            timeout: Duration::from_secs(parse_or(
                "CORPORA_TIMEOUT_SECS",
                get("CORPORA_TIMEOUT_SECS"),
                DEFAULT_TIMEOUT_SECS,
            )?),
            cache_capacity: get("CORPORA_CACHE_CAPACITY")
                .map(|v| parse_value("CORPORA_CACHE_CAPACITY", &v))
                .transpose()?,
            registry_ttl: Duration::from_secs(parse_or(
                "CORPORA_REGISTRY_TTL_SECS",
                get("CORPORA_REGISTRY_TTL_SECS"),
                DEFAULT_REGISTRY_TTL_SECS,
            )?),
            bind: get("CORPORA_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            knowledge_base: get("CORPORA_KB").map(|v| v.trim().to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(invalid("CORPORA_CHUNK_SIZE", "must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(invalid(
                "CORPORA_CHUNK_OVERLAP",
                format!("must be smaller than the chunk size ({})", self.chunk_size),
            ));
        }
        if self.top_k == 0 {
            return Err(invalid("CORPORA_TOP_K", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("CORPORA_TEMPERATURE", "must be within [0, 2]"));
        }
        if self.embed_batch == 0 {
            return Err(invalid("CORPORA_EMBED_BATCH", "must be at least 1"));
        }
        if self.cache_capacity == Some(0) {
            return Err(invalid("CORPORA_CACHE_CAPACITY", "must be at least 1 when set"));
        }
        Ok(())
    }
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { var, reason: reason.into() }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| invalid(var, format!("{raw:?}: {e}")))
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => parse_value(var, &v),
        None => Ok(default),
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let env_file_error = |e: dotenvy::Error| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    match dotenvy::from_path_iter(path) {
        Ok(entries) => entries.collect::<Result<_, _>>().map_err(env_file_error),
        Err(e) if e.not_found() => Ok(HashMap::new()),
        Err(e) => Err(env_file_error(e)),
    }
}

fn default_data_path(leaf: &str, var: &'static str) -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir().ok_or(ConfigError::NoDataDir(var))?;
    Ok(base.join(APP_DIR).join(leaf))
}

// Corpora Library
// Exports core modules for use by both the server and the CLI binary

pub mod cache;
pub mod chain;
pub mod config;
pub mod documents;
pub mod ingest;
pub mod llm;
pub mod registry;
pub mod router;
pub mod server;
pub mod service;
pub mod session;
pub mod store;

// Re-export commonly used types for the binaries
pub use cache::ChainCache;
pub use chain::{Answer, ChainError, ChainSettings, RagChain, SourceRef};
pub use config::{Config, ConfigError};
pub use documents::{Chunk, Document};
pub use ingest::{IngestError, IngestMode, IngestReport, Ingestor, DEFAULT_KB_NAME};
pub use llm::{Embedder, GeminiClient, Generator};
pub use registry::KnowledgeBaseRegistry;
pub use router::{Router, RoutingDecision};
pub use service::{
    Outcome, QueryService, Reply, ServiceMode,
    EMPTY_QUERY_REPLY, NOT_READY_REPLY, UNROUTED_REPLY,
};
pub use session::{ChatSession, Role, SessionError, SessionStore, Turn};
pub use store::{KnowledgeBaseInfo, KnowledgeBaseStore, VectorIndex};

/// Install the stderr log subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

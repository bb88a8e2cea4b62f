//! Corpora HTTP server
//!
//! Serves `POST /chat`. With `CORPORA_KB` set, every query is answered from
//! that knowledge base; otherwise queries are routed among all of them.

use std::sync::Arc;

use corpora_lib::{init_tracing, server, Config, QueryService, ServiceMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Fails here, before the listener exists, if the credential is missing
    let config = Config::from_env()?;

    let mode = match &config.knowledge_base {
        Some(name) => ServiceMode::Single(name.clone()),
        None => ServiceMode::Routed,
    };
    tracing::info!(
        mode = ?mode,
        storage_root = %config.storage_root.display(),
        "Starting corpora server"
    );

    let service = Arc::new(QueryService::from_config(&config, mode));
    server::serve(service, &config.bind).await
}

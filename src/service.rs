//! Query Service
//!
//! The request boundary. Drives one query through
//! `Received -> Routing -> Routed | Unrouted -> Loading -> Retrieving ->
//! Generating -> Answered`, and turns every failure along the way into a
//! user-facing `Reply`. Nothing in here returns an error to its caller.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use ulid::Ulid;

use crate::cache::ChainCache;
use crate::chain::{ChainError, ChainSettings, RagChain, SourceRef};
use crate::config::Config;
use crate::llm::{Embedder, GeminiClient, Generator};
use crate::registry::KnowledgeBaseRegistry;
use crate::router::{Router, RoutingDecision};
use crate::store::{IndexError, KnowledgeBaseStore};

pub const NOT_READY_REPLY: &str =
    "The knowledge base is not yet available. Please run the ingestion script first.";
pub const EMPTY_QUERY_REPLY: &str = "Please ask a question.";
pub const UNROUTED_REPLY: &str =
    "I could not determine which knowledge base is relevant to your question.";

/// Which knowledge base a query is answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceMode {
    /// Always the named knowledge base; no routing call.
    Single(String),
    /// Route each query among every persisted knowledge base.
    Routed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Answered,
    EmptyQuery,
    NotReady,
    Unrouted,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub text: String,
    pub outcome: Outcome,
    pub knowledge_base: Option<String>,
    pub sources: Vec<SourceRef>,
}

impl Reply {
    fn fixed(text: &str, outcome: Outcome) -> Self {
        Self {
            text: text.to_string(),
            outcome,
            knowledge_base: None,
            sources: Vec::new(),
        }
    }

    fn failed(knowledge_base: &str, error: &QueryError) -> Self {
        Self {
            text: format!("An error occurred: {}", error),
            outcome: Outcome::Failed,
            knowledge_base: Some(knowledge_base.to_string()),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Received,
    Routing,
    Routed,
    Unrouted,
    Loading,
    Retrieving,
    Generating,
}

fn enter(state: QueryState) {
    debug!(state = ?state, "Query state");
}

#[derive(Error, Debug)]
enum QueryError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("{0} timed out after {1:?}")]
    TimedOut(&'static str, Duration),
}

impl QueryError {
    fn is_not_found(&self) -> bool {
        matches!(self, QueryError::Chain(ChainError::Index(e)) if e.is_not_found())
    }
}

pub struct QueryService {
    mode: ServiceMode,
    store: Arc<KnowledgeBaseStore>,
    registry: KnowledgeBaseRegistry,
    router: Router,
    cache: ChainCache,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    settings: ChainSettings,
    timeout: Duration,
}

impl QueryService {
    pub fn new(
        mode: ServiceMode,
        store: Arc<KnowledgeBaseStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            mode,
            registry: KnowledgeBaseRegistry::new(
                store.clone(),
                Duration::from_secs(crate::config::DEFAULT_REGISTRY_TTL_SECS),
            ),
            store,
            router: Router::new(generator.clone()),
            cache: ChainCache::new(None),
            embedder,
            generator,
            settings: ChainSettings::default(),
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Wire a service against the hosted provider.
    pub fn from_config(config: &Config, mode: ServiceMode) -> Self {
        let client = Arc::new(GeminiClient::from_config(config));
        let store = Arc::new(KnowledgeBaseStore::new(&config.storage_root));
        Self::new(mode, store, client.clone(), client)
            .with_settings(ChainSettings { top_k: config.top_k, temperature: config.temperature })
            .with_timeout(config.timeout)
            .with_cache_capacity(config.cache_capacity)
            .with_registry_ttl(config.registry_ttl)
    }

    pub fn with_settings(mut self, settings: ChainSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.cache = ChainCache::new(capacity);
        self
    }

    pub fn with_registry_ttl(mut self, ttl: Duration) -> Self {
        self.registry = KnowledgeBaseRegistry::new(self.store.clone(), ttl);
        self
    }

    pub fn mode(&self) -> &ServiceMode {
        &self.mode
    }

    /// Answer one query according to the service mode.
    pub async fn handle(&self, query: &str) -> Reply {
        let span = info_span!("query", id = %Ulid::new());
        async {
            enter(QueryState::Received);
            let reply = match &self.mode {
                ServiceMode::Single(name) => self.answer_from(name, query).await,
                ServiceMode::Routed => self.answer_routed(query).await,
            };
            log_reply(&reply);
            reply
        }
        .instrument(span)
        .await
    }

    /// Answer from a specific knowledge base, bypassing the router.
    pub async fn handle_in(&self, name: &str, query: &str) -> Reply {
        let span = info_span!("query", id = %Ulid::new(), kb = %name);
        async {
            enter(QueryState::Received);
            let reply = self.answer_from(name, query).await;
            log_reply(&reply);
            reply
        }
        .instrument(span)
        .await
    }

    /// Routing decision for `query` against every live knowledge base.
    pub async fn route(&self, query: &str) -> RoutingDecision {
        let available = self.available();
        match tokio::time::timeout(self.timeout, self.router.try_route(query.trim(), &available)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(error = %e, "Routing failed");
                RoutingDecision::Unrouted
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Routing timed out");
                RoutingDecision::Unrouted
            }
        }
    }

    /// Names the router may choose from.
    pub fn available(&self) -> Vec<String> {
        self.registry.list().unwrap_or_else(|e| {
            warn!(error = %e, "Could not list knowledge bases");
            Vec::new()
        })
    }

    async fn answer_routed(&self, query: &str) -> Reply {
        if self.available().is_empty() {
            return Reply::fixed(NOT_READY_REPLY, Outcome::NotReady);
        }
        let query = query.trim();
        if query.is_empty() {
            return Reply::fixed(EMPTY_QUERY_REPLY, Outcome::EmptyQuery);
        }

        enter(QueryState::Routing);
        match self.route(query).await {
            RoutingDecision::Routed(name) => {
                enter(QueryState::Routed);
                info!(kb = %name, "Routed query");
                self.answer_ready(&name, query).await
            }
            RoutingDecision::Unrouted => {
                enter(QueryState::Unrouted);
                Reply::fixed(UNROUTED_REPLY, Outcome::Unrouted)
            }
        }
    }

    async fn answer_from(&self, name: &str, query: &str) -> Reply {
        let ready = self.registry.contains(name).unwrap_or_else(|e| {
            warn!(error = %e, "Could not list knowledge bases");
            false
        });
        if !ready {
            self.cache.invalidate(name);
            return Reply::fixed(NOT_READY_REPLY, Outcome::NotReady);
        }
        let query = query.trim();
        if query.is_empty() {
            return Reply::fixed(EMPTY_QUERY_REPLY, Outcome::EmptyQuery);
        }
        self.answer_ready(name, query).await
    }

    async fn answer_ready(&self, name: &str, query: &str) -> Reply {
        match self.run_chain(name, query).await {
            Ok(reply) => reply,
            Err(e) if e.is_not_found() => {
                // Removed between the registry scan and the load
                self.registry.invalidate();
                self.cache.invalidate(name);
                Reply::fixed(NOT_READY_REPLY, Outcome::NotReady)
            }
            Err(e) => {
                warn!(kb = %name, error = %e, "Query failed");
                Reply::failed(name, &e)
            }
        }
    }

    async fn run_chain(&self, name: &str, query: &str) -> Result<Reply, QueryError> {
        enter(QueryState::Loading);
        let chain = self.chain(name).await?;

        enter(QueryState::Retrieving);
        let context = tokio::time::timeout(self.timeout, chain.retrieve(query))
            .await
            .map_err(|_| QueryError::TimedOut("Retrieval", self.timeout))??;

        enter(QueryState::Generating);
        let answer = tokio::time::timeout(self.timeout, chain.synthesize(query, &context))
            .await
            .map_err(|_| QueryError::TimedOut("Generation", self.timeout))??;

        Ok(Reply {
            text: answer.text,
            outcome: Outcome::Answered,
            knowledge_base: Some(name.to_string()),
            sources: answer.sources,
        })
    }

    /// Cached chain for `name`, reloaded when a newer build has been published.
    async fn chain(&self, name: &str) -> Result<Arc<RagChain>, ChainError> {
        if let Some(cached) = self.cache.get(name) {
            let current = self.current_generation(name).await?;
            if current.as_deref() == Some(cached.generation()) {
                return Ok(cached);
            }
            info!(kb = %name, old = %cached.generation(), "Knowledge base rebuilt, reloading");
            self.cache.evict_stale(name, &cached);
        }

        self.cache
            .get_or_try_load(name, || async {
                let store = self.store.clone();
                let owned = name.to_string();
                let index = tokio::task::spawn_blocking(move || store.open(&owned))
                    .await
                    .map_err(|e| IndexError::Io(std::io::Error::other(e.to_string())))??;
                info!(kb = %name, generation = %index.generation, chunks = index.len(), "Loaded knowledge base");
                Ok::<_, ChainError>(RagChain::new(
                    Arc::new(index),
                    self.embedder.clone(),
                    self.generator.clone(),
                    self.settings,
                ))
            })
            .await
    }

    async fn current_generation(&self, name: &str) -> Result<Option<String>, IndexError> {
        let store = self.store.clone();
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || store.current_generation(&owned))
            .await
            .map_err(|e| IndexError::Io(std::io::Error::other(e.to_string())))?
    }
}

fn log_reply(reply: &Reply) {
    match reply.outcome {
        Outcome::Answered => info!(kb = ?reply.knowledge_base, sources = reply.sources.len(), "Answered"),
        Outcome::EmptyQuery => debug!("Empty query"),
        Outcome::NotReady => warn!("No knowledge base available"),
        Outcome::Unrouted => info!("Answer unavailable: query not routed"),
        Outcome::Failed => warn!(kb = ?reply.knowledge_base, "Query failed"),
    }
}

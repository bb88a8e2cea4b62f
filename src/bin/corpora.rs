//! Corpora CLI
//!
//! Command-line interface for ingestion, one-off questions, routing checks
//! and interactive chat. Results are printed to stdout as JSON; logs go to
//! stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use corpora_lib::{
    init_tracing, ChatSession, Config, GeminiClient, IngestMode, Ingestor, KnowledgeBaseStore,
    QueryService, Role, RoutingDecision, ServiceMode, SessionStore, SourceRef, DEFAULT_KB_NAME,
};

#[derive(Parser)]
#[command(name = "corpora")]
#[command(about = "Corpora CLI - question answering over document corpora", long_about = None)]
struct Cli {
    /// Storage root for knowledge bases (overrides CORPORA_STORAGE_ROOT)
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild knowledge bases from the documents directory
    Ingest {
        /// Documents directory (overrides CORPORA_DOCUMENTS_DIR)
        #[arg(short, long)]
        documents: Option<PathBuf>,
        /// Build one knowledge base per source file
        #[arg(long, conflicts_with = "name")]
        per_file: bool,
        /// Name of the combined knowledge base
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Answer a single question
    Ask {
        question: String,
        /// Answer from this knowledge base instead of routing
        #[arg(long)]
        kb: Option<String>,
    },
    /// Show which knowledge base a question routes to
    Route { question: String },
    /// Interactive chat on stdin
    Chat {
        /// Resume a saved session (with or without sess_ prefix)
        #[arg(short, long)]
        session: Option<String>,
        /// Answer from this knowledge base instead of routing
        #[arg(long)]
        kb: Option<String>,
        /// Don't persist the session
        #[arg(long)]
        no_save: bool,
    },
    /// Knowledge base commands
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },
    /// Chat session commands
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// List persisted knowledge bases
    List,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List saved chat sessions
    List,
    /// Delete a saved chat session
    Delete {
        /// Session id (with or without sess_ prefix)
        id: String,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
struct AskOutput {
    answer: String,
    outcome: corpora_lib::Outcome,
    knowledge_base: Option<String>,
    sources: Vec<SourceRef>,
}

#[derive(Serialize)]
struct KbListItem {
    name: String,
    generation: Option<String>,
}

#[derive(Serialize)]
struct SessionListItem {
    id: String,
    turns: usize,
    updated: String,
}

#[derive(Serialize)]
struct DeletedOutput {
    deleted: String,
}

#[derive(Serialize)]
struct ChatOutput {
    session_id: String,
    turns: usize,
    saved: bool,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match Config::from_env() {
        Ok(mut config) => {
            if let Some(root) = cli.storage_root {
                config.storage_root = root;
            }
            run(cli.command, config).await
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput { error: e.to_string() };
            println!("{}", serde_json::to_string(&error).unwrap_or_else(|_| e.to_string()));
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands, config: Config) -> anyhow::Result<String> {
    match command {
        Commands::Ingest { documents, per_file, name } => handle_ingest(config, documents, per_file, name).await,
        Commands::Ask { question, kb } => handle_ask(config, question, kb).await,
        Commands::Route { question } => handle_route(config, question).await,
        Commands::Chat { session, kb, no_save } => handle_chat(config, session, kb, no_save).await,
        Commands::Kb { action } => handle_kb(config, action),
        Commands::Session { action } => handle_session(config, action),
    }
}

// ============ Handlers ============

async fn handle_ingest(
    config: Config,
    documents: Option<PathBuf>,
    per_file: bool,
    name: Option<String>,
) -> anyhow::Result<String> {
    let documents_dir = documents.unwrap_or_else(|| config.documents_dir.clone());
    let mode = if per_file {
        IngestMode::PerSource
    } else {
        IngestMode::Combined { name: name.unwrap_or_else(|| DEFAULT_KB_NAME.to_string()) }
    };

    let store = Arc::new(KnowledgeBaseStore::new(&config.storage_root));
    let embedder = Arc::new(GeminiClient::from_config(&config));
    let ingestor = Ingestor::new(store, embedder, config.chunk_size, config.chunk_overlap);

    let report = ingestor.run(&documents_dir, &mode).await?;
    if report.built.is_empty() {
        anyhow::bail!("No knowledge base was built; {} source(s) failed", report.failures.len());
    }
    Ok(serde_json::to_string(&report)?)
}

fn service_for(config: &Config, kb: Option<String>) -> QueryService {
    let mode = match kb.or_else(|| config.knowledge_base.clone()) {
        Some(name) => ServiceMode::Single(name),
        None => ServiceMode::Routed,
    };
    QueryService::from_config(config, mode)
}

async fn handle_ask(config: Config, question: String, kb: Option<String>) -> anyhow::Result<String> {
    let service = service_for(&config, None);
    let reply = match kb {
        Some(name) => service.handle_in(&name, &question).await,
        None => service.handle(&question).await,
    };
    let output = AskOutput {
        answer: reply.text,
        outcome: reply.outcome,
        knowledge_base: reply.knowledge_base,
        sources: reply.sources,
    };
    Ok(serde_json::to_string(&output)?)
}

async fn handle_route(config: Config, question: String) -> anyhow::Result<String> {
    let service = QueryService::from_config(&config, ServiceMode::Routed);
    let decision: RoutingDecision = service.route(&question).await;
    Ok(serde_json::to_string(&decision)?)
}

async fn handle_chat(
    config: Config,
    session_id: Option<String>,
    kb: Option<String>,
    no_save: bool,
) -> anyhow::Result<String> {
    let store = SessionStore::new(&config.sessions_dir);
    let mut session = match session_id {
        Some(id) => store.load(&id)?,
        None => ChatSession::new(),
    };
    let service = service_for(&config, kb);

    let stdin = std::io::stdin();
    let mut stderr = std::io::stderr();
    eprint!("> ");
    stderr.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }
        let turn = session.exchange(&service, &line).await;
        debug_assert_eq!(turn.role, Role::Assistant);
        eprintln!("{}\n", turn.content);
        if !no_save {
            store.save(&session)?;
        }
        eprint!("> ");
        stderr.flush()?;
    }

    let output = ChatOutput {
        session_id: session.id.clone(),
        turns: session.turns.len(),
        saved: !no_save,
    };
    Ok(serde_json::to_string(&output)?)
}

fn handle_kb(config: Config, action: KbAction) -> anyhow::Result<String> {
    match action {
        KbAction::List => {
            let store = KnowledgeBaseStore::new(&config.storage_root);
            let items = store
                .list()?
                .into_iter()
                .map(|name| {
                    let generation = store.current_generation(&name).ok().flatten();
                    KbListItem { name, generation }
                })
                .collect::<Vec<_>>();
            Ok(serde_json::to_string(&items)?)
        }
    }
}

fn handle_session(config: Config, action: SessionAction) -> anyhow::Result<String> {
    match action {
        SessionAction::List => {
            let sessions = SessionStore::new(&config.sessions_dir).list()?;
            let items: Vec<SessionListItem> = sessions
                .iter()
                .map(|s| SessionListItem {
                    id: s.id.clone(),
                    turns: s.turns.len(),
                    updated: s.updated.to_rfc3339(),
                })
                .collect();
            Ok(serde_json::to_string(&items)?)
        }
        SessionAction::Delete { id } => {
            SessionStore::new(&config.sessions_dir).delete(&id)?;
            Ok(serde_json::to_string(&DeletedOutput { deleted: id })?)
        }
    }
}

//! HTTP Query Endpoint
//!
//! `POST /chat` takes `{"message": "..."}` (or `{"query": "..."}`) and always
//! answers 200 with `{"reply": "...", ...}`; failures are in the reply text.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::chain::SourceRef;
use crate::service::{QueryService, ServiceMode};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default, alias = "query")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub knowledge_base: Option<String>,
    pub sources: Vec<SourceRef>,
}

pub fn router(service: Arc<QueryService>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/api/knowledge-bases", get(knowledge_bases))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn chat(State(service): State<Arc<QueryService>>, Json(req): Json<ChatRequest>) -> Json<ChatResponse> {
    let message = req.message.unwrap_or_default();
    let reply = service.handle(&message).await;
    Json(ChatResponse {
        reply: reply.text,
        knowledge_base: reply.knowledge_base,
        sources: reply.sources,
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn knowledge_bases(State(service): State<Arc<QueryService>>) -> Json<serde_json::Value> {
    let mode = match service.mode() {
        ServiceMode::Single(name) => serde_json::json!({ "single": name }),
        ServiceMode::Routed => serde_json::json!("routed"),
    };
    Json(serde_json::json!({
        "mode": mode,
        "knowledge_bases": service.available(),
    }))
}

/// Serve until Ctrl-C.
pub async fn serve(service: Arc<QueryService>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

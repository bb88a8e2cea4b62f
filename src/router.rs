//! Knowledge Base Router
//!
//! Picks which knowledge base a query belongs to by asking the generation
//! model, at temperature 0, to answer with one of the available names.
//!
//! Match policy: the reply is trimmed, one pair of wrapping quotes or
//! backticks is removed, and the result is compared ASCII-case-insensitively
//! with the available names. Exactly one name must match; the registered
//! spelling is returned. The no-match word, and anything else, routes nowhere.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{GenerationError, Generator};

/// Sampling temperature used for classification.
pub const ROUTING_TEMPERATURE: f32 = 0.0;

/// Word the model is told to answer with when no name fits. Reserved as a
/// knowledge-base name.
pub const NO_MATCH: &str = "NONE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "name", rename_all = "lowercase")]
pub enum RoutingDecision {
    Routed(String),
    Unrouted,
}

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Routing call failed: {0}")]
    Generation(#[from] GenerationError),
}

pub struct Router {
    generator: Arc<dyn Generator>,
}

impl Router {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Classify `query`, surfacing model failures to the caller.
    pub async fn try_route(&self, query: &str, available: &[String]) -> Result<RoutingDecision, RoutingError> {
        if available.is_empty() {
            debug!("No knowledge bases available, skipping routing call");
            return Ok(RoutingDecision::Unrouted);
        }

        let prompt = build_prompt(query, available);
        let raw = self.generator.generate(&prompt, ROUTING_TEMPERATURE).await?;
        let decision = parse_decision(&raw, available);
        debug!(raw = %raw.trim(), decision = ?decision, "Router replied");
        Ok(decision)
    }

    /// Classify `query`; a failed model call is logged and routes nowhere.
    pub async fn route(&self, query: &str, available: &[String]) -> RoutingDecision {
        match self.try_route(query, available).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Routing failed");
                RoutingDecision::Unrouted
            }
        }
    }
}

/// Classification prompt listing every name verbatim, in sorted order.
pub fn build_prompt(query: &str, available: &[String]) -> String {
    let mut names: Vec<&str> = available.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();

    let listing = names
        .iter()
        .map(|n| format!("- {}", n))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a router that decides which knowledge base can answer a question.\n\
         Available knowledge bases:\n{listing}\n\n\
         Reply with exactly one knowledge base name from the list above and nothing else.\n\
         If none of them is relevant, reply with {NO_MATCH}.\n\n\
         Question: {query}\n\
         Knowledge base:"
    )
}

/// Map the model's raw reply onto the available names.
pub fn parse_decision(raw: &str, available: &[String]) -> RoutingDecision {
    let candidate = strip_wrapping(raw.trim()).trim();
    if candidate.is_empty() || candidate.eq_ignore_ascii_case(NO_MATCH) {
        return RoutingDecision::Unrouted;
    }

    let mut matches = available.iter().filter(|n| n.eq_ignore_ascii_case(candidate));
    match (matches.next(), matches.next()) {
        (Some(name), None) => RoutingDecision::Routed(name.clone()),
        _ => RoutingDecision::Unrouted,
    }
}

fn strip_wrapping(s: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

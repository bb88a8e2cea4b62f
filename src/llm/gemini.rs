//! Gemini HTTP Client
//!
//! Direct client for the Generative Language REST API. Uses reqwest instead
//! of an SDK wrapper so request shapes and timeouts stay under our control.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

use super::{Embedder, Embedding, EmbeddingError, GenerationError, Generator};
use crate::config::Config;

const TASK_DOCUMENT: &str = "RETRIEVAL_DOCUMENT";
const TASK_QUERY: &str = "RETRIEVAL_QUERY";

/// Gemini client for both embeddings and generation
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    generation_model: String,
    batch_size: usize,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        embedding_model: &str,
        generation_model: &str,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            embedding_model: model_path(embedding_model),
            generation_model: model_path(generation_model),
            batch_size: crate::config::DEFAULT_EMBED_BATCH,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.api_base,
            &config.api_key,
            &config.embedding_model,
            &config.generation_model,
            config.timeout,
        )
        .with_batch_size(config.embed_batch)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn post(&self, model: &str, method: &str, body: &Value) -> Result<(u16, String), reqwest::Error> {
        let resp = self
            .http
            .post(format!("{}/{}:{}", self.base_url, model, method))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        Ok((status, text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let body = batch_embed_body(&self.embedding_model, texts, TASK_DOCUMENT);
        let (status, text) = self.post(&self.embedding_model, "batchEmbedContents", &body).await?;
        if !(200..300).contains(&status) {
            let message = api_error_message(&text);
            error!(status = status, message = %message, "Batch embedding failed");
            return Err(EmbeddingError::Api { status, message });
        }
        parse_batch_embeddings(&text, texts.len())
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.embedding_model, count = batch.len(), "Embedding batch");
            embeddings.extend(self.embed_batch(batch).await?);
        }
        Ok(embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let body = embed_body(&self.embedding_model, text, TASK_QUERY);
        let (status, text) = self.post(&self.embedding_model, "embedContent", &body).await?;
        if !(200..300).contains(&status) {
            let message = api_error_message(&text);
            error!(status = status, message = %message, "Query embedding failed");
            return Err(EmbeddingError::Api { status, message });
        }
        parse_embedding(&text)
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let body = generate_body(prompt, temperature);
        debug!(model = %self.generation_model, temperature = temperature, "Generating");
        let (status, text) = self.post(&self.generation_model, "generateContent", &body).await?;
        if !(200..300).contains(&status) {
            let message = api_error_message(&text);
            error!(status = status, message = %message, "Generation failed");
            return Err(GenerationError::Api { status, message });
        }
        parse_generation(&text)
    }

    fn model_name(&self) -> &str {
        &self.generation_model
    }
}

/// Normalize `text-embedding-004` and `models/text-embedding-004` alike.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn content(text: &str) -> Value {
    json!({ "parts": [{ "text": text }] })
}

fn embed_body(model: &str, text: &str, task_type: &str) -> Value {
    json!({
        "model": model,
        "content": content(text),
        "taskType": task_type,
    })
}

fn batch_embed_body(model: &str, texts: &[String], task_type: &str) -> Value {
    let requests: Vec<Value> = texts.iter().map(|t| embed_body(model, t, task_type)).collect();
    json!({ "requests": requests })
}

fn generate_body(prompt: &str, temperature: f32) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "temperature": temperature },
    })
}

fn values_of(embedding: &Value) -> Option<Embedding> {
    embedding["values"]
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn parse_embedding(text: &str) -> Result<Embedding, EmbeddingError> {
    let body: Value = serde_json::from_str(text).map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
    values_of(&body["embedding"])
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EmbeddingError::Malformed("missing embedding.values".to_string()))
}

fn parse_batch_embeddings(text: &str, expected: usize) -> Result<Vec<Embedding>, EmbeddingError> {
    let body: Value = serde_json::from_str(text).map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
    let items = body["embeddings"]
        .as_array()
        .ok_or_else(|| EmbeddingError::Malformed("missing embeddings".to_string()))?;

    if items.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} embeddings, got {}",
            expected,
            items.len()
        )));
    }

    items
        .iter()
        .map(|item| values_of(item).ok_or_else(|| EmbeddingError::Malformed("missing values".to_string())))
        .collect()
}

fn parse_generation(text: &str) -> Result<String, GenerationError> {
    let body: Value = serde_json::from_str(text).map_err(|e| GenerationError::Malformed(e.to_string()))?;

    if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::Blocked(reason.to_string()));
    }

    let candidate = &body["candidates"][0];
    let parts = candidate["content"]["parts"]
        .as_array()
        .ok_or_else(|| match candidate["finishReason"].as_str() {
            Some(reason) => GenerationError::Blocked(reason.to_string()),
            None => GenerationError::Malformed("no candidates".to_string()),
        })?;

    let answer: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    Ok(answer)
}

/// Pull the human-readable message out of an API error body.
fn api_error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| text.chars().take(500).collect())
}

//! Schema Embedder
//!
//! Embeds schema descriptions and user questions with the Gemini embeddings API.

use crate::error::{AssistantError, Result};
use crate::llm::model_path;
use crate::schema_rag::vector_store::Embedding;
use async_trait::async_trait;

/// Text embedding backend
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Embedding client using Gemini `embedContent`
pub struct SchemaEmbedder {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String, // e.g., "models/embedding-001"
    task_type: String,
}

impl SchemaEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model_path(&model),
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }
}

#[async_trait]
impl Embedder for SchemaEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "content": { "parts": [{ "text": text }] },
            "taskType": self.task_type,
        });

        let response = self
            .http
            .post(format!("{}/{}:embedContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        parse_embedding(&response_json)
    }
}

fn parse_embedding(response_json: &serde_json::Value) -> Result<Embedding> {
    let values = response_json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| AssistantError::Embedding("No embedding vector in response".to_string()))?;

    let embedding: Embedding = values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if embedding.is_empty() {
        return Err(AssistantError::Embedding("Embedding vector is empty".to_string()));
    }

    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_embedding() {
        let response = json!({ "embedding": { "values": [0.25, -0.5, 1.0] } });
        assert_eq!(parse_embedding(&response).unwrap(), vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_parse_embedding_missing() {
        assert!(parse_embedding(&json!({ "error": "nope" })).is_err());
        assert!(parse_embedding(&json!({ "embedding": { "values": [] } })).is_err());
    }

    #[test]
    fn test_model_is_prefixed() {
        let embedder = SchemaEmbedder::new("k".into(), "http://x/".into(), "embedding-001".into());
        assert_eq!(embedder.model, "models/embedding-001");
        assert_eq!(embedder.base_url, "http://x");
        let embedder = embedder.with_task_type("RETRIEVAL_QUERY");
        assert_eq!(embedder.task_type, "RETRIEVAL_QUERY");
    }
}

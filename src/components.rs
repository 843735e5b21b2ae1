//! Component initialization
//!
//! Wires the chat model, schema retriever and warehouse manager from an
//! [`AppConfig`].

use crate::config::AppConfig;
use crate::error::{AssistantError, Result};
use crate::llm::{ChatModel, LlmClient};
use crate::response_handler::{RefusalDetector, ResponseHandler};
use crate::schema_rag::{Embedder, Retriever, SchemaEmbedder, SchemaRAG};
use crate::warehouse::BigQueryManager;
use std::sync::Arc;
use tracing::info;

pub struct Components {
    pub llm: Arc<dyn ChatModel>,
    pub vector_store: Arc<dyn Retriever>,
    pub warehouse: BigQueryManager,
}

impl Components {
    /// Response handler over these components using the configured retrieval settings.
    pub fn response_handler(&self, config: &AppConfig) -> ResponseHandler {
        ResponseHandler::new(self.llm.clone(), self.vector_store.clone(), config.top_k)
            .with_detector(RefusalDetector::new(config.refusal_sentence.clone()))
    }
}

pub fn build_embedder(config: &AppConfig) -> Arc<dyn Embedder> {
    Arc::new(SchemaEmbedder::new(
        config.gemini_api_key.clone(),
        config.base_url.clone(),
        config.embedding_model.clone(),
    ))
}

/// Build all long-lived clients. The persisted collection is loaded from
/// `config.collection_path()`; a missing file starts an empty collection.
pub async fn initialize_components(config: &AppConfig) -> Result<Components> {
    let warehouse = BigQueryManager::new(config.project_id.clone(), config.dataset_id.clone())
        .with_access_token(config.bigquery_access_token.clone());

    let llm = LlmClient::new(
        config.gemini_api_key.clone(),
        config.chat_model.clone(),
        config.base_url.clone(),
    );

    let collection_path = config.collection_path();
    let path = collection_path.clone();
    let embedder = build_embedder(config);
    let rag = tokio::task::spawn_blocking(move || SchemaRAG::open(embedder, &path))
        .await
        .map_err(|e| AssistantError::VectorStore(format!("Failed to load vector store: {}", e)))??;

    info!(
        model = %config.chat_model,
        collection = %collection_path.display(),
        documents = rag.vector_store_len(),
        "Components initialized"
    );

    Ok(Components {
        llm: Arc::new(llm),
        vector_store: Arc::new(rag),
        warehouse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_with_missing_collection() {
        let dir = std::env::temp_dir().join(format!("components_test_{}", uuid::Uuid::new_v4()));
        let config = AppConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("test-key".to_string()),
            "PROJECT_ID" => Some("acme".to_string()),
            "VECTOR_STORE_DIR" => Some(dir.display().to_string()),
            _ => None,
        })
        .unwrap();

        let components = initialize_components(&config).await.unwrap();
        assert_eq!(components.llm.model_name(), "gemini-1.5-pro");
        assert_eq!(components.warehouse.project_id(), Some("acme"));
        assert_eq!(components.response_handler(&config).top_k(), 3);
    }
}

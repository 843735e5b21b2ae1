//! Application configuration
//!
//! Built once at process start from environment variables (after `.env` has
//! been loaded) and passed by reference to whatever needs it.

use crate::error::{AssistantError, Result};
use crate::prompts::REFUSAL_SENTENCE;
use std::path::PathBuf;

pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_PERSIST_DIR: &str = "./chroma_langchain_db";
pub const DEFAULT_COLLECTION: &str = "example_collection";
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Warehouse project
    pub project_id: Option<String>,
    /// Warehouse dataset used as the default for unqualified table names
    pub dataset_id: Option<String>,
    pub gemini_api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub base_url: String,
    pub persist_directory: PathBuf,
    pub collection_name: String,
    pub top_k: usize,
    pub bigquery_access_token: Option<String>,
    pub refusal_sentence: String,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset. `GEMINI_API_KEY` is the only
    /// required key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gemini_api_key = get("GEMINI_API_KEY").ok_or_else(|| {
            AssistantError::Config(
                "GEMINI_API_KEY is not set. Please check your .env file.".to_string(),
            )
        })?;

        let top_k = match get("RETRIEVAL_TOP_K") {
            Some(raw) => {
                let k: usize = raw.parse().map_err(|_| {
                    AssistantError::Config(format!("RETRIEVAL_TOP_K must be a positive integer, got '{}'", raw))
                })?;
                if k == 0 {
                    return Err(AssistantError::Config(
                        "RETRIEVAL_TOP_K must be greater than zero".to_string(),
                    ));
                }
                k
            }
            None => DEFAULT_TOP_K,
        };

        Ok(Self {
            project_id: get("PROJECT_ID"),
            dataset_id: get("DATASET_ID"),
            gemini_api_key,
            chat_model: get("GEMINI_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            embedding_model: get("GEMINI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            base_url: get("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            persist_directory: get("VECTOR_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PERSIST_DIR)),
            collection_name: get("VECTOR_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            top_k,
            bigquery_access_token: get("BIGQUERY_ACCESS_TOKEN"),
            refusal_sentence: get("REFUSAL_SENTENCE").unwrap_or_else(|| REFUSAL_SENTENCE.to_string()),
        })
    }

    /// Location of the persisted collection file.
    pub fn collection_path(&self) -> PathBuf {
        self.persist_directory.join(format!("{}.json", self.collection_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = AppConfig::from_lookup(lookup_from(&[("PROJECT_ID", "p")])).unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_blank_api_key_is_config_error() {
        let err = AppConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "   ")])).unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "key")])).unwrap();
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.refusal_sentence, REFUSAL_SENTENCE);
        assert!(config.project_id.is_none());
        assert_eq!(
            config.collection_path(),
            PathBuf::from("./chroma_langchain_db").join("example_collection.json")
        );
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "key"),
            ("PROJECT_ID", "acme"),
            ("DATASET_ID", "sales"),
            ("RETRIEVAL_TOP_K", "5"),
            ("GEMINI_BASE_URL", "http://localhost:9000/"),
        ]))
        .unwrap();
        assert_eq!(config.project_id.as_deref(), Some("acme"));
        assert_eq!(config.dataset_id.as_deref(), Some("sales"));
        assert_eq!(config.top_k, 5);
        assert_eq!(config.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_invalid_top_k() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "key"),
            ("RETRIEVAL_TOP_K", "three"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RETRIEVAL_TOP_K"));

        let err = AppConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "key"),
            ("RETRIEVAL_TOP_K", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
    }
}

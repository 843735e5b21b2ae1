//! Vector Store
//!
//! In-memory cosine-similarity store persisted as a single JSON file per
//! collection. Search is a linear scan; collections hold schema descriptions,
//! which stay small.

use crate::error::{AssistantError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InMemoryVectorStore {
    /// Fixed by the first document added
    dimension: Option<usize>,
    /// Insertion order is kept so equal scores rank stably
    documents: Vec<Document>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document to the store
    pub fn add_document(&mut self, document: Document) -> Result<()> {
        if document.embedding.is_empty() {
            return Err(AssistantError::VectorStore(format!(
                "Document {} has an empty embedding",
                document.id
            )));
        }

        match self.dimension {
            Some(dimension) if dimension != document.embedding.len() => {
                return Err(AssistantError::VectorStore(format!(
                    "Embedding dimension {} doesn't match store dimension {}",
                    document.embedding.len(),
                    dimension
                )));
            }
            Some(_) => {}
            None => self.dimension = Some(document.embedding.len()),
        }

        if let Some(existing) = self.documents.iter_mut().find(|d| d.id == document.id) {
            warn!(id = %document.id, "Replacing existing document");
            *existing = document;
        } else {
            self.documents.push(document);
        }
        Ok(())
    }

    /// Search for the `top_k` documents most similar to the query embedding
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };

        if query_embedding.len() != dimension {
            return Err(AssistantError::VectorStore(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query_embedding.len(),
                dimension
            )));
        }

        let mut results: Vec<SearchResult> = self
            .documents
            .iter()
            .map(|doc| SearchResult {
                score: cosine_similarity(query_embedding, &doc.embedding),
                document: doc.clone(),
            })
            .collect();

        // Stable sort keeps insertion order among ties
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }

    pub fn get_document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Save the store to disk, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string(self)?;
        std::fs::write(path, encoded)?;
        info!(path = %path.display(), documents = self.documents.len(), "Saved vector store");
        Ok(())
    }

    /// Load the store from disk; a missing file yields an empty store
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "No persisted vector store found, starting empty");
            return Ok(Self::new());
        }
        let encoded = std::fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&encoded).map_err(|e| {
            AssistantError::VectorStore(format!("Failed to parse vector store {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), documents = store.documents.len(), "Loaded vector store");
        Ok(store)
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

//! Schema RAG Retriever
//!
//! Retrieves relevant schema descriptions using vector search.

use crate::error::Result;
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::vector_store::{Document, InMemoryVectorStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One similarity-search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
}

impl TextChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// Similarity search over stored documents
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` chunks nearest to `query`, most similar first.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<TextChunk>>;
}

/// Retrieved schema fragments, in the order the store returned them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContext {
    fragments: Vec<String>,
}

impl SchemaContext {
    pub fn new(fragments: Vec<String>) -> Self {
        Self { fragments }
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl fmt::Display for SchemaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fragments.join("\n"))
    }
}

/// Fetch the `k` nearest schema fragments for `query`.
pub async fn retrieve_context(retriever: &dyn Retriever, query: &str, k: usize) -> Result<SchemaContext> {
    let chunks = retriever.similarity_search(query, k).await?;
    debug!(requested = k, returned = chunks.len(), "Retrieved schema context");
    Ok(SchemaContext::new(chunks.into_iter().map(|c| c.content).collect()))
}

/// Embedding-backed schema retriever
pub struct SchemaRAG {
    vector_store: InMemoryVectorStore,
    embedder: Arc<dyn Embedder>,
}

impl SchemaRAG {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_store(embedder, InMemoryVectorStore::new())
    }

    pub fn with_store(embedder: Arc<dyn Embedder>, vector_store: InMemoryVectorStore) -> Self {
        Self { vector_store, embedder }
    }

    /// Open a persisted collection (empty if the file does not exist yet)
    pub fn open(embedder: Arc<dyn Embedder>, path: &Path) -> Result<Self> {
        Ok(Self::with_store(embedder, InMemoryVectorStore::load(path)?))
    }

    /// Embed and store schema descriptions. Returns the new document ids.
    pub async fn add_texts(
        &mut self,
        texts: &[String],
        metadata: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(texts.len());
        for text in texts {
            let embedding = self.embedder.embed(text).await?;
            let doc = Document {
                id: uuid::Uuid::new_v4().to_string(),
                text: text.clone(),
                metadata: metadata.clone(),
                embedding,
                created_at: Utc::now(),
            };
            ids.push(doc.id.clone());
            self.vector_store.add_document(doc)?;
        }
        info!(added = ids.len(), total = self.vector_store.len(), "Indexed schema documents");
        Ok(ids)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.vector_store.save(path)
    }

    /// Get the number of documents in the vector store
    pub fn vector_store_len(&self) -> usize {
        self.vector_store.len()
    }
}

#[async_trait]
impl Retriever for SchemaRAG {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<TextChunk>> {
        let query_embedding = self.embedder.embed(query).await?;
        let results = self.vector_store.search(&query_embedding, k)?;
        Ok(results
            .into_iter()
            .map(|r| TextChunk::new(r.document.text))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use crate::schema_rag::vector_store::Embedding;

    /// Bag-of-keywords embedding so similarity follows shared words.
    struct KeywordEmbedder;

    const VOCABULARY: [&str; 4] = ["customers", "orders", "products", "weather"];

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding> {
            let lower = text.to_lowercase();
            let vector: Embedding = VOCABULARY
                .iter()
                .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
                .collect();
            Ok(vector)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Err(AssistantError::Embedding("quota exceeded".to_string()))
        }
    }

    struct FixedRetriever(Vec<&'static str>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<TextChunk>> {
            Ok(self.0.iter().take(k).map(|s| TextChunk::new(*s)).collect())
        }
    }

    #[tokio::test]
    async fn test_retrieve_context_joins_with_newlines() {
        let retriever = FixedRetriever(vec!["Table a", "Table b", "Table c", "Table d"]);
        let context = retrieve_context(&retriever, "anything", 3).await.unwrap();
        assert_eq!(context.fragments().len(), 3);
        assert_eq!(context.to_string(), "Table a\nTable b\nTable c");
    }

    #[tokio::test]
    async fn test_empty_context_renders_empty() {
        let retriever = FixedRetriever(vec![]);
        let context = retrieve_context(&retriever, "anything", 3).await.unwrap();
        assert!(context.is_empty());
        assert_eq!(context.to_string(), "");
    }

    #[tokio::test]
    async fn test_schema_rag_ranks_matching_table_first() {
        let mut rag = SchemaRAG::new(Arc::new(KeywordEmbedder));
        let texts = vec![
            "Table orders: id, customer_id, total".to_string(),
            "Table customers: id, name, email".to_string(),
            "Table products: sku, price".to_string(),
        ];
        let ids = rag.add_texts(&texts, &HashMap::new()).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(rag.vector_store_len(), 3);

        let chunks = rag.similarity_search("List all customers", 2).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "Table customers: id, name, email");
    }

    #[tokio::test]
    async fn test_schema_rag_propagates_embedding_errors() {
        let rag = SchemaRAG::new(Arc::new(FailingEmbedder));
        let err = rag.similarity_search("List all customers", 3).await.unwrap_err();
        assert!(matches!(err, AssistantError::Embedding(_)));
    }
}

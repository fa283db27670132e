use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::deadline;
use crate::errors::AgentError;
use crate::rag::embeddings::EmbeddingPipeline;
use crate::rag::vector_store::{collection_name, VectorIndex};

/// One retrieved piece of knowledge, ready to be placed in a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub content: String,
    pub source: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

/// Query-side access to an agent's knowledge base.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn retrieve(
        &self,
        agent_id: Uuid,
        query: &str,
        limit: usize,
        score_threshold: f32,
        cancel: &CancellationToken,
    ) -> Result<Vec<KnowledgeSnippet>, AgentError>;
}

/// Embeds the query and searches the agent's collection.
pub struct KnowledgeRetriever {
    embeddings: Arc<EmbeddingPipeline>,
    index: Arc<dyn VectorIndex>,
    collection_prefix: String,
    search_timeout: Duration,
}

impl KnowledgeRetriever {
    pub fn new(
        embeddings: Arc<EmbeddingPipeline>,
        index: Arc<dyn VectorIndex>,
        collection_prefix: impl Into<String>,
    ) -> Self {
        Self {
            embeddings,
            index,
            collection_prefix: collection_prefix.into(),
            search_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }
}

fn payload_str<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
}

#[async_trait]
impl KnowledgeSource for KnowledgeRetriever {
    async fn retrieve(
        &self,
        agent_id: Uuid,
        query: &str,
        limit: usize,
        score_threshold: f32,
        cancel: &CancellationToken,
    ) -> Result<Vec<KnowledgeSnippet>, AgentError> {
        if query.trim().is_empty() {
            return Err(AgentError::InvalidInput("Query cannot be empty".to_string()));
        }

        log::info!(
            "Knowledge search for agent {}: limit={}, threshold={}",
            agent_id,
            limit,
            score_threshold
        );

        let vector = self.embeddings.embed_query(query, cancel).await?;
        let collection = collection_name(&self.collection_prefix, &agent_id);

        let hits = deadline::bounded(
            "vector search",
            self.search_timeout,
            cancel,
            self.index.search(&collection, &vector, limit, score_threshold),
        )
        .await?;

        let snippets: Vec<KnowledgeSnippet> = hits
            .into_iter()
            .filter(|hit| hit.score >= score_threshold)
            .take(limit)
            .map(|hit| KnowledgeSnippet {
                content: payload_str(&hit.payload, &["content", "text"])
                    .unwrap_or_default()
                    .to_string(),
                source: payload_str(&hit.payload, &["source", "file_name"])
                    .unwrap_or("unknown")
                    .to_string(),
                score: hit.score,
                metadata: hit.payload,
            })
            .collect();

        log::info!("Knowledge search returned {} snippets", snippets.len());
        Ok(snippets)
    }
}

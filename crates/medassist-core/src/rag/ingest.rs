//! Document ingestion and knowledge-base maintenance for agents.
//!
//! An upload runs chunk, embed, upsert and only then writes the file row. If anything
//! after the first upsert fails, the points carrying the file's stored name are
//! removed again so the index never holds vectors for a file with no completed row.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::deadline;
use crate::errors::AgentError;
use crate::models::{FileStatus, KnowledgeFile};
use crate::rag::embeddings::EmbeddingPipeline;
use crate::rag::splitter::{Chunk, TextChunker};
use crate::rag::vector_store::{
    collection_name, CollectionStats, FieldFilter, PointRecord, VectorIndex,
};
use crate::store::MetadataStore;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub agent_id: Uuid,
    pub file_name: String,
    pub content: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub agent_id: Uuid,
    pub collection_name: String,
    pub vector_count: u64,
    pub file_count: usize,
    pub total_size: u64,
    pub total_chunks: usize,
    pub collection: Option<CollectionStats>,
}

pub struct KnowledgeService {
    store: Arc<dyn MetadataStore>,
    chunker: TextChunker,
    embeddings: Arc<EmbeddingPipeline>,
    index: Arc<dyn VectorIndex>,
    collection_prefix: String,
    index_timeout: Duration,
}

impl KnowledgeService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        chunker: TextChunker,
        embeddings: Arc<EmbeddingPipeline>,
        index: Arc<dyn VectorIndex>,
        collection_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chunker,
            embeddings,
            index,
            collection_prefix: collection_prefix.into(),
            index_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_index_timeout(mut self, timeout: Duration) -> Self {
        self.index_timeout = timeout;
        self
    }

    pub fn collection_for(&self, agent_id: &Uuid) -> String {
        collection_name(&self.collection_prefix, agent_id)
    }

    pub async fn upload_document(
        &self,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<KnowledgeFile, AgentError> {
        if request.file_name.trim().is_empty() {
            return Err(AgentError::InvalidInput("File name cannot be empty".to_string()));
        }
        if request.content.trim().is_empty() {
            return Err(AgentError::InvalidInput("Document content is empty".to_string()));
        }

        self.store
            .get_agent(request.agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("agent {}", request.agent_id)))?;

        let chunks = self.chunker.split(&request.content);
        if chunks.is_empty() {
            return Err(AgentError::InvalidInput(format!(
                "No chunks produced from {}",
                request.file_name
            )));
        }

        let file_id = Uuid::new_v4();
        let stored_name = format!("{}_{}", file_id, request.file_name);
        let collection = self.collection_for(&request.agent_id);
        let created_at = Utc::now();

        log::info!(
            "Ingesting {} for agent {}: {} chunks into {}",
            request.file_name,
            request.agent_id,
            chunks.len(),
            collection
        );

        deadline::bounded(
            "collection setup",
            self.index_timeout,
            cancel,
            self.index.ensure_collection(&collection, self.embeddings.dimension()),
        )
        .await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedded = self.embeddings.embed(&texts, cancel).await?;

        let points: Vec<PointRecord> = chunks
            .iter()
            .zip(embedded)
            .map(|(chunk, result)| {
                PointRecord::new(
                    result.vector,
                    chunk_payload(chunk, &request, &stored_name, created_at),
                )
            })
            .collect();

        let upserted = deadline::bounded(
            "vector upsert",
            self.index_timeout,
            cancel,
            self.index.upsert(&collection, points),
        )
        .await;
        if let Err(e) = upserted {
            self.discard_points(&collection, &stored_name).await;
            return Err(e);
        }

        let file = KnowledgeFile {
            id: file_id,
            agent_id: request.agent_id,
            file_name: stored_name.clone(),
            original_name: request.file_name.clone(),
            file_size: request.size,
            file_type: request.mime_type.clone(),
            collection_name: collection.clone(),
            chunk_count: chunks.len(),
            status: FileStatus::Completed,
            created_at,
            processed_at: Some(Utc::now()),
        };

        if let Err(e) = self.store.put_knowledge_file(file.clone()).await {
            log::error!("Failed to record {} after upsert: {}", stored_name, e);
            self.discard_points(&collection, &stored_name).await;
            return Err(e);
        }

        log::info!(
            "Stored {} ({} chunks) as file {}",
            request.file_name,
            file.chunk_count,
            file.id
        );
        Ok(file)
    }

    /// Compensating delete. Runs even when the caller's token is already cancelled.
    async fn discard_points(&self, collection: &str, stored_name: &str) {
        let filter = FieldFilter::new().must_match("file_name", stored_name);
        let outcome = deadline::bounded(
            "compensating delete",
            self.index_timeout,
            &CancellationToken::new(),
            self.index.delete_by_filter(collection, &filter),
        )
        .await;
        match outcome {
            Ok(()) => log::warn!("Removed points for {} from {}", stored_name, collection),
            Err(e) => log::error!(
                "Could not remove points for {} from {}: {}",
                stored_name,
                collection,
                e
            ),
        }
    }

    pub async fn list_files(&self, agent_id: Uuid) -> Result<Vec<KnowledgeFile>, AgentError> {
        self.store.list_knowledge_files(agent_id).await
    }

    pub async fn delete_knowledge_file(
        &self,
        agent_id: Uuid,
        file_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let file = self
            .store
            .get_knowledge_file(file_id)
            .await?
            .filter(|f| f.agent_id == agent_id)
            .ok_or_else(|| AgentError::NotFound(format!("knowledge file {}", file_id)))?;

        let filter = FieldFilter::new().must_match("file_name", file.file_name.as_str());
        deadline::bounded(
            "vector delete",
            self.index_timeout,
            cancel,
            self.index.delete_by_filter(&file.collection_name, &filter),
        )
        .await?;

        self.store.delete_knowledge_file(file_id).await?;
        log::info!("Deleted knowledge file {} for agent {}", file_id, agent_id);
        Ok(())
    }

    /// Drops the agent's collection and every file row. Returns the number of rows removed.
    pub async fn delete_all_agent_knowledge(
        &self,
        agent_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<usize, AgentError> {
        let collection = self.collection_for(&agent_id);
        deadline::bounded(
            "collection delete",
            self.index_timeout,
            cancel,
            self.index.delete_collection(&collection),
        )
        .await?;

        let removed = self.store.delete_knowledge_files(agent_id).await?;
        log::info!(
            "Deleted collection {} and {} file records for agent {}",
            collection,
            removed,
            agent_id
        );
        Ok(removed)
    }

    pub async fn knowledge_stats(
        &self,
        agent_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<KnowledgeStats, AgentError> {
        let collection = self.collection_for(&agent_id);
        let files = self.store.list_knowledge_files(agent_id).await?;

        let info = match deadline::bounded(
            "collection info",
            self.index_timeout,
            cancel,
            self.index.collection_stats(&collection),
        )
        .await
        {
            Ok(stats) => Some(stats),
            Err(AgentError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(KnowledgeStats {
            agent_id,
            vector_count: info.as_ref().map_or(0, |s| s.points_count),
            file_count: files.len(),
            total_size: files.iter().map(|f| f.file_size).sum(),
            total_chunks: files.iter().map(|f| f.chunk_count).sum(),
            collection_name: collection,
            collection: info,
        })
    }

    /// True when the agent has a collection in the index.
    pub async fn validate_agent_knowledge(
        &self,
        agent_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<bool, AgentError> {
        let collection = self.collection_for(&agent_id);
        deadline::bounded(
            "collection check",
            self.index_timeout,
            cancel,
            self.index.collection_exists(&collection),
        )
        .await
    }
}

fn chunk_payload(
    chunk: &Chunk,
    request: &UploadRequest,
    stored_name: &str,
    created_at: chrono::DateTime<Utc>,
) -> Map<String, Value> {
    let payload = json!({
        "text": chunk.text,
        "content": chunk.text,
        "source": request.file_name,
        "file_name": stored_name,
        "chunk_index": chunk.index,
        "char_count": chunk.char_count,
        "word_count": chunk.word_count,
        "start_idx": chunk.start_offset,
        "end_idx": chunk.end_offset,
        "agent_id": request.agent_id.to_string(),
        "created_at": created_at.to_rfc3339(),
    });
    match payload {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

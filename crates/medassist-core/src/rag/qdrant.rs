//! Qdrant REST gateway
//!
//! Talks to the Qdrant HTTP API directly with `reqwest`. Collections use cosine
//! distance; point payloads are passed through untouched so callers can filter
//! on any field they stored.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::errors::AgentError;
use crate::rag::vector_store::{CollectionStats, FieldFilter, PointRecord, SearchHit, VectorIndex};

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    indexed_vectors_count: Option<u64>,
    #[serde(default)]
    segments_count: u64,
}

impl QdrantIndex {
    pub fn new(config: QdrantConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AgentError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<Option<T>, AgentError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            log::debug!("Qdrant {}: not found", operation);
            return Ok(None);
        }
        if !status.is_success() {
            log::error!("Qdrant {} failed ({}): {}", operation, status, text);
            return Err(AgentError::ProviderError(format!(
                "Qdrant {} failed ({}): {}",
                operation, status, text
            )));
        }

        let parsed: QdrantResponse<T> = serde_json::from_str(&text).map_err(|e| {
            AgentError::ProviderContractViolation(format!(
                "Unexpected Qdrant {} response: {}",
                operation, e
            ))
        })?;
        Ok(Some(parsed.result))
    }
}

/// Qdrant point ids are unsigned integers or UUID strings.
fn wire_id(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(id.to_string()),
    }
}

fn point_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_body(filter: &FieldFilter) -> Value {
    let must: Vec<Value> = filter
        .conditions()
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect();
    json!({ "must": must })
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn collection_exists(&self, name: &str) -> Result<bool, AgentError> {
        let result: Option<ExistsResult> = self
            .execute(
                "collection exists",
                self.request(Method::GET, &format!("/collections/{}/exists", name)),
            )
            .await?;
        Ok(result.map(|r| r.exists).unwrap_or(false))
    }

    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), AgentError> {
        if self.collection_exists(name).await? {
            log::debug!("Collection {} already exists", name);
            return Ok(());
        }

        log::info!("Creating collection {} (dimension {}, cosine)", name, dimension);
        let body = json!({ "vectors": { "size": dimension, "distance": "Cosine" } });
        let response = self
            .request(Method::PUT, &format!("/collections/{}", name))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            // 409: another request created it between the check and the create.
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(AgentError::ProviderError(format!(
            "Qdrant create collection failed ({}): {}",
            status, text
        )))
    }

    async fn upsert(&self, name: &str, points: Vec<PointRecord>) -> Result<(), AgentError> {
        if points.is_empty() {
            return Ok(());
        }

        let count = points.len();
        let body = json!({
            "points": points
                .into_iter()
                .map(|p| json!({ "id": wire_id(&p.id), "vector": p.vector, "payload": p.payload }))
                .collect::<Vec<_>>()
        });

        let result: Option<Value> = self
            .execute(
                "upsert",
                self.request(Method::PUT, &format!("/collections/{}/points?wait=true", name))
                    .json(&body),
            )
            .await?;
        if result.is_none() {
            return Err(AgentError::NotFound(format!("collection {}", name)));
        }

        log::info!("Upserted {} points into {}", count, name);
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>, AgentError> {
        let body = json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true
        });

        let points: Option<Vec<ScoredPoint>> = self
            .execute(
                "search",
                self.request(Method::POST, &format!("/collections/{}/points/search", name))
                    .json(&body),
            )
            .await?;

        let hits: Vec<SearchHit> = points
            .unwrap_or_default()
            .into_iter()
            .map(|p| SearchHit {
                id: point_id(&p.id),
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect();

        log::debug!("Qdrant search in {} returned {} hits", name, hits.len());
        Ok(hits)
    }

    async fn delete_by_filter(&self, name: &str, filter: &FieldFilter) -> Result<(), AgentError> {
        if filter.is_empty() {
            return Err(AgentError::InvalidInput("Delete filter has no conditions".to_string()));
        }

        let body = json!({ "filter": filter_body(filter) });
        let _: Option<Value> = self
            .execute(
                "delete points",
                self.request(
                    Method::POST,
                    &format!("/collections/{}/points/delete?wait=true", name),
                )
                .json(&body),
            )
            .await?;
        log::info!("Deleted points from {} matching {} conditions", name, filter.conditions().len());
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), AgentError> {
        let _: Option<Value> = self
            .execute(
                "delete collection",
                self.request(Method::DELETE, &format!("/collections/{}", name)),
            )
            .await?;
        log::info!("Deleted collection {}", name);
        Ok(())
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats, AgentError> {
        let info: Option<CollectionInfo> = self
            .execute(
                "collection info",
                self.request(Method::GET, &format!("/collections/{}", name)),
            )
            .await?;
        let info = info.ok_or_else(|| AgentError::NotFound(format!("collection {}", name)))?;

        Ok(CollectionStats {
            points_count: info.points_count.unwrap_or(0),
            indexed_vectors_count: info.indexed_vectors_count.unwrap_or(0),
            segments_count: info.segments_count,
            status: info.status,
        })
    }
}

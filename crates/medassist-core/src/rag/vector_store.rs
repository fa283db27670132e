use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AgentError;

/// A vector with its payload, as stored in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

impl PointRecord {
    /// Creates a point with a fresh UUID identifier.
    pub fn new(vector: Vec<f32>, payload: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            payload,
        }
    }

    pub fn with_id(id: impl Into<String>, vector: Vec<f32>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// Payload equality conditions, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldFilter {
    conditions: Vec<(String, Value)>,
}

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_match(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| payload.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub points_count: u64,
    pub indexed_vectors_count: u64,
    pub segments_count: u64,
    pub status: String,
}

/// Collection naming: one collection per agent.
pub fn collection_name(prefix: &str, agent_id: &Uuid) -> String {
    format!("{}{}", prefix, agent_id)
}

/// Similarity index with per-collection isolation and cosine scoring.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, AgentError>;

    /// Creates the collection if absent. Never fails because it already exists.
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), AgentError>;

    async fn upsert(&self, name: &str, points: Vec<PointRecord>) -> Result<(), AgentError>;

    /// Up to `limit` hits scoring at least `score_threshold`, best first. A missing
    /// or empty collection yields no hits.
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>, AgentError>;

    async fn delete_by_filter(&self, name: &str, filter: &FieldFilter) -> Result<(), AgentError>;

    async fn delete_collection(&self, name: &str) -> Result<(), AgentError>;

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats, AgentError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone)]
struct Collection {
    dimension: usize,
    points: Vec<PointRecord>,
}

/// Process-local index used in tests and single-node setups.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn collection_exists(&self, name: &str) -> Result<bool, AgentError> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), AgentError> {
        let mut collections = self.collections.write().await;
        if !collections.contains_key(name) {
            log::info!("Creating collection {} (dimension {})", name, dimension);
            collections.insert(
                name.to_string(),
                Collection {
                    dimension,
                    points: Vec::new(),
                },
            );
        }
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<PointRecord>) -> Result<(), AgentError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| AgentError::NotFound(format!("collection {}", name)))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != collection.dimension) {
            return Err(AgentError::InvalidInput(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                collection.dimension,
                bad.vector.len()
            )));
        }

        for point in points {
            collection.points.retain(|p| p.id != point.id);
            collection.points.push(point);
        }
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>, AgentError> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(name) else {
            return Ok(Vec::new());
        };

        if vector.len() != collection.dimension {
            return Err(AgentError::InvalidInput(format!(
                "Query embedding dimension mismatch: expected {}, got {}",
                collection.dimension,
                vector.len()
            )));
        }

        let mut hits: Vec<SearchHit> = collection
            .points
            .iter()
            .map(|p| SearchHit {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_filter(&self, name: &str, filter: &FieldFilter) -> Result<(), AgentError> {
        if filter.is_empty() {
            return Err(AgentError::InvalidInput("Delete filter has no conditions".to_string()));
        }
        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get_mut(name) {
            collection.points.retain(|p| !filter.matches(&p.payload));
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), AgentError> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats, AgentError> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| AgentError::NotFound(format!("collection {}", name)))?;
        let count = collection.points.len() as u64;
        Ok(CollectionStats {
            points_count: count,
            indexed_vectors_count: count,
            segments_count: 1,
            status: "green".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(file: &str, chunk: i64) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("file_name".to_string(), json!(file));
        map.insert("chunk_index".to_string(), json!(chunk));
        map
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection("agent_a", 2).await.unwrap();
        index
            .upsert("agent_a", vec![PointRecord::new(vec![1.0, 0.0], payload("a.txt", 0))])
            .await
            .unwrap();
        index.ensure_collection("agent_a", 2).await.unwrap();
        assert_eq!(index.collection_stats("agent_a").await.unwrap().points_count, 1);
    }

    #[tokio::test]
    async fn test_search_threshold_limit_and_order() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection("c", 2).await.unwrap();
        index
            .upsert(
                "c",
                vec![
                    PointRecord::with_id("far", vec![0.0, 1.0], payload("a", 0)),
                    PointRecord::with_id("near", vec![1.0, 0.1], payload("a", 1)),
                    PointRecord::with_id("exact", vec![1.0, 0.0], payload("b", 0)),
                ],
            )
            .await
            .unwrap();

        let hits = index.search("c", &[1.0, 0.0], 10, 0.5).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);

        let top = index.search("c", &[1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "exact");
    }

    #[tokio::test]
    async fn test_upsert_with_wrong_dimension_writes_nothing() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection("c", 2).await.unwrap();

        let result = index
            .upsert(
                "c",
                vec![
                    PointRecord::with_id("ok", vec![1.0, 0.0], payload("a", 0)),
                    PointRecord::with_id("bad", vec![1.0, 0.0, 0.0], payload("a", 1)),
                ],
            )
            .await;

        assert!(matches!(result, Err(AgentError::InvalidInput(msg)) if msg.contains("expected 2, got 3")));
        assert_eq!(index.collection_stats("c").await.unwrap().points_count, 0);
    }

    #[tokio::test]
    async fn test_missing_collection_search_is_empty() {
        let index = InMemoryVectorIndex::new();
        assert!(index.search("nope", &[1.0], 3, 0.0).await.unwrap().is_empty());
        assert!(index.upsert("nope", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_by_filter_requires_all_conditions() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection("c", 2).await.unwrap();
        index
            .upsert(
                "c",
                vec![
                    PointRecord::new(vec![1.0, 0.0], payload("a.txt", 0)),
                    PointRecord::new(vec![1.0, 0.0], payload("a.txt", 1)),
                    PointRecord::new(vec![1.0, 0.0], payload("b.txt", 0)),
                ],
            )
            .await
            .unwrap();

        let filter = FieldFilter::new().must_match("file_name", "a.txt").must_match("chunk_index", 1);
        index.delete_by_filter("c", &filter).await.unwrap();
        assert_eq!(index.collection_stats("c").await.unwrap().points_count, 2);

        index
            .delete_by_filter("c", &FieldFilter::new().must_match("file_name", "a.txt"))
            .await
            .unwrap();
        let remaining = index.search("c", &[1.0, 0.0], 10, 0.0).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].payload["file_name"], "b.txt");
    }

    #[tokio::test]
    async fn test_delete_collection() {
        let index = InMemoryVectorIndex::new();
        index.ensure_collection("c", 2).await.unwrap();
        index.delete_collection("c").await.unwrap();
        assert!(!index.collection_exists("c").await.unwrap());
        assert!(matches!(index.collection_stats("c").await, Err(AgentError::NotFound(_))));
    }
}

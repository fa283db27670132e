// src/test_utils/keyword_embedder.rs
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::AgentError;
use crate::rag::embeddings::{EmbeddingBatch, EmbeddingProvider};

/// Deterministic embedder: one dimension per vocabulary word plus a constant bias
/// dimension, so texts sharing words score high under cosine similarity.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
    fail: bool,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// An embedder whose every call fails with a provider error.
    pub fn failing() -> Self {
        Self {
            vocabulary: vec!["x".to_string()],
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|word| if lower.contains(word.as_str()) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AgentError::ProviderError("embedding service unavailable".to_string()));
        }
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| self.vector_for(t)).collect(),
            total_tokens: Some(texts.len() as u32 * 10),
        })
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len() + 1
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::deadline;
use crate::errors::AgentError;

/// Vectors returned for one request, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: Option<u32>,
}

/// A single embedding request against an upstream service.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AgentError>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Embedding of one input text.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    pub text: String,
    pub vector: Vec<f32>,
    pub approx_token_usage: u32,
}

#[derive(Debug, Clone)]
pub struct RestEmbeddingConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub model_name: String,
    pub embedding_dimension: usize,
    pub timeout_seconds: u64,
}

impl Default for RestEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model_name: "text-embedding-3-large".to_string(),
            embedding_dimension: 3072,
            timeout_seconds: 60,
        }
    }
}

/// Dimension of the known OpenAI embedding models.
pub fn known_model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-large" => Some(3072),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

/// OpenAI-compatible `/embeddings` client.
pub struct RestEmbeddingClient {
    client: Client,
    config: RestEmbeddingConfig,
}

impl RestEmbeddingClient {
    pub fn new(config: RestEmbeddingConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AgentError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RestEmbeddingConfig {
        &self.config
    }
}

#[async_trait]
impl EmbeddingProvider for RestEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AgentError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| AgentError::ConfigError("Embedding API key not configured".to_string()))?;

        let url = format!("{}/embeddings", self.config.api_base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.config.model_name,
            "input": texts,
            "encoding_format": "float"
        });

        log::debug!(
            "Embedding request to {} with {} inputs (model {})",
            url,
            texts.len(),
            self.config.model_name
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            log::error!("Embedding API error response ({}): {}", status, response_text);
            return Err(AgentError::ProviderError(format!(
                "Embedding API error ({}): {}",
                status, response_text
            )));
        }

        let response_data: OpenAIEmbeddingResponse = serde_json::from_str(&response_text)
            .map_err(|e| {
                AgentError::ProviderContractViolation(format!(
                    "Failed to parse embedding response: {}",
                    e
                ))
            })?;

        let vectors = order_by_index(response_data.data, texts.len())?;

        Ok(EmbeddingBatch {
            vectors,
            total_tokens: response_data.usage.map(|u| u.total_tokens),
        })
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Places each returned vector at the position the provider echoed back.
fn order_by_index(
    items: Vec<OpenAIEmbeddingItem>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, AgentError> {
    if items.len() != expected {
        return Err(AgentError::ProviderContractViolation(format!(
            "Mismatch between input texts ({}) and returned embeddings ({})",
            expected,
            items.len()
        )));
    }

    if items.iter().any(|item| item.index.is_none()) {
        return Ok(items.into_iter().map(|item| item.embedding).collect());
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in items {
        let index = item.index.unwrap_or_default();
        let slot = slots.get_mut(index).ok_or_else(|| {
            AgentError::ProviderContractViolation(format!(
                "Embedding index {} out of range for {} inputs",
                index, expected
            ))
        })?;
        if slot.is_some() {
            return Err(AgentError::ProviderContractViolation(format!(
                "Duplicate embedding index {}",
                index
            )));
        }
        *slot = Some(item.embedding);
    }

    Ok(slots.into_iter().flatten().collect())
}

#[derive(Debug, serde::Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
    #[serde(default)]
    usage: Option<OpenAIEmbeddingUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAIEmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAIEmbeddingUsage {
    total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingPipelineConfig {
    pub batch_size: usize,
    pub call_timeout: Duration,
    pub batch_pause: Duration,
}

impl Default for EmbeddingPipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            call_timeout: Duration::from_secs(60),
            batch_pause: Duration::from_millis(100),
        }
    }
}

/// Batches texts into provider requests and re-zips the vectors with their inputs.
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingPipelineConfig,
}

impl EmbeddingPipeline {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingPipelineConfig) -> Self {
        let config = EmbeddingPipelineConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self { provider, config }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<EmbeddingResult>, AgentError> {
        if texts.is_empty() {
            return Err(AgentError::InvalidInput("No texts provided for embedding".to_string()));
        }
        if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(AgentError::InvalidInput(format!(
                "Text at position {} is empty",
                position
            )));
        }

        let batches: Vec<&[String]> = texts.chunks(self.config.batch_size).collect();
        log::info!(
            "Generating embeddings for {} texts in {} batches using {}",
            texts.len(),
            batches.len(),
            self.provider.model_name()
        );

        let mut results = Vec::with_capacity(texts.len());
        for (i, batch) in batches.iter().enumerate() {
            log::debug!("Processing batch {}/{} ({} texts)", i + 1, batches.len(), batch.len());

            let response = deadline::bounded(
                "embedding request",
                self.config.call_timeout,
                cancel,
                self.provider.embed_batch(batch),
            )
            .await?;

            self.check_batch(batch.len(), &response)?;

            let per_text = response.total_tokens.unwrap_or(0) / batch.len() as u32;
            results.extend(batch.iter().zip(response.vectors).map(|(text, vector)| {
                EmbeddingResult {
                    text: text.clone(),
                    vector,
                    approx_token_usage: per_text,
                }
            }));

            if i + 1 < batches.len() {
                deadline::pause(self.config.batch_pause, cancel).await?;
            }
        }

        log::info!("Successfully generated {} embeddings", results.len());
        Ok(results)
    }

    pub async fn embed_query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, AgentError> {
        self.embed(&[query.to_string()], cancel)
            .await?
            .pop()
            .map(|result| result.vector)
            .ok_or_else(|| {
                AgentError::ProviderContractViolation("No embedding returned for query".to_string())
            })
    }

    fn check_batch(&self, requested: usize, response: &EmbeddingBatch) -> Result<(), AgentError> {
        if response.vectors.len() != requested {
            log::error!(
                "Embedding provider returned {} vectors for {} inputs",
                response.vectors.len(),
                requested
            );
            return Err(AgentError::ProviderContractViolation(format!(
                "Requested {} embeddings but received {}",
                requested,
                response.vectors.len()
            )));
        }

        let dimension = self.provider.dimension();
        if let Some(bad) = response.vectors.iter().find(|v| v.len() != dimension) {
            return Err(AgentError::ProviderContractViolation(format!(
                "Embedding dimension {} does not match configured {}",
                bad.len(),
                dimension
            )));
        }
        Ok(())
    }
}

//! Configuration type definitions.
//!
//! Every section has serde defaults, so a minimal file only lists agents. Secrets
//! never live in the file: each `api_key_env` names the environment variable the
//! loader reads the key from.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::AgentError;
use crate::models::AgentProfile;
use crate::rag::embeddings::{known_model_dimension, EmbeddingPipelineConfig};
use crate::rag::splitter::ChunkerConfig;
use crate::service::{AssistantSettings, RetrievalFailurePolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedassistConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_openai_base")]
    pub api_base: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_openai_base(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Falls back to the model's known dimension, then 3072.
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default = "default_openai_base")]
    pub api_base: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: None,
            api_base: default_openai_base(),
            api_key_env: default_openai_key_env(),
            api_key: None,
            batch_size: default_batch_size(),
            timeout_secs: default_llm_timeout(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl EmbeddingsConfig {
    pub fn resolved_dimension(&self) -> usize {
        self.dimension
            .or_else(|| known_model_dimension(&self.model))
            .unwrap_or(3072)
    }

    pub fn pipeline_config(&self) -> EmbeddingPipelineConfig {
        EmbeddingPipelineConfig {
            batch_size: self.batch_size,
            call_timeout: Duration::from_secs(self.timeout_secs),
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key_env: None,
            api_key: None,
            timeout_secs: default_vector_timeout(),
            collection_prefix: default_collection_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_knowledge_limit")]
    pub knowledge_limit: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,
    #[serde(default)]
    pub failure_policy: RetrievalFailurePolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            knowledge_limit: default_knowledge_limit(),
            score_threshold: default_score_threshold(),
            history_limit: default_history_limit(),
            history_page_size: default_history_page_size(),
            failure_policy: RetrievalFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

/// Clinic API the dialogue tools call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_clinic_base")]
    pub base_url: String,
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            base_url: default_clinic_base(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON metadata file; in-memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection_prefix() -> String {
    "agent_".to_string()
}
fn default_clinic_base() -> String {
    "http://localhost:8080/api/".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_llm_timeout() -> u64 { 60 }
fn default_vector_timeout() -> u64 { 30 }
fn default_tool_timeout() -> u64 { 15 }
fn default_batch_size() -> usize { 50 }
fn default_batch_pause_ms() -> u64 { 100 }
fn default_knowledge_limit() -> usize { 3 }
fn default_score_threshold() -> f32 { 0.5 }
fn default_history_limit() -> usize { 10 }
fn default_history_page_size() -> usize { 50 }
fn default_max_tool_rounds() -> usize { 5 }

impl MedassistConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        self.chunking.validate()?;

        if self.embeddings.model.trim().is_empty() {
            return Err(AgentError::ConfigError("Embedding model cannot be empty".to_string()));
        }
        if self.embeddings.batch_size == 0 {
            return Err(AgentError::ConfigError(
                "Embedding batch_size must be greater than 0".to_string(),
            ));
        }
        if self.embeddings.resolved_dimension() == 0 {
            return Err(AgentError::ConfigError(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            return Err(AgentError::ConfigError(format!(
                "score_threshold must be within [0, 1], got {}",
                self.retrieval.score_threshold
            )));
        }
        if self.retrieval.knowledge_limit == 0 {
            return Err(AgentError::ConfigError(
                "knowledge_limit must be greater than 0".to_string(),
            ));
        }
        if self.dialogue.max_tool_rounds == 0 {
            return Err(AgentError::ConfigError(
                "max_tool_rounds must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id) {
                return Err(AgentError::ConfigError(format!("Duplicate agent id {}", agent.id)));
            }
            if agent.model.trim().is_empty() {
                return Err(AgentError::ConfigError(format!("Agent {} has no model", agent.id)));
            }
            if !(0.0..=2.0).contains(&agent.temperature) {
                return Err(AgentError::ConfigError(format!(
                    "Agent {} temperature must be within [0, 2], got {}",
                    agent.id, agent.temperature
                )));
            }
            if agent.is_active && agent.api_key.is_empty() {
                return Err(AgentError::ConfigError(format!(
                    "Agent {} is active but has no API key (set {})",
                    agent.id,
                    agent.api_key_env.as_deref().unwrap_or("api_key_env")
                )));
            }
        }

        Ok(())
    }

    pub fn assistant_settings(&self) -> AssistantSettings {
        AssistantSettings {
            knowledge_limit: self.retrieval.knowledge_limit,
            score_threshold: self.retrieval.score_threshold,
            history_limit: self.retrieval.history_limit,
            history_page_size: self.retrieval.history_page_size,
            max_tool_rounds: self.dialogue.max_tool_rounds,
            completion_timeout: Duration::from_secs(self.llm.timeout_secs),
            tool_timeout: Duration::from_secs(self.tools.timeout_secs),
            retrieval_failure: self.retrieval.failure_policy,
        }
    }
}

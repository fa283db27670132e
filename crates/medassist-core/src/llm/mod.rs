//! Chat-completion provider abstractions.
//!
//! The orchestrator only sees the [`LLM`] trait. A [`ProviderFactory`] turns an
//! agent snapshot into an authenticated client, so credentials are injected per
//! request instead of living in globals.

pub use crate::core_types::{CompletionRequest, CompletionResponse, Message};
use crate::errors::AgentError;
use crate::models::AgentProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub mod openai;

pub use openai::{OpenAIClient, OpenAIProviderFactory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait LLM: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AgentError>;
}

/// Builds a chat client carrying the agent's own credential.
pub trait ProviderFactory: Send + Sync {
    fn chat_client(&self, agent: &AgentProfile) -> Result<Arc<dyn LLM>, AgentError>;
}

//! Records owned by the metadata store: agents, dialog turns and knowledge files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core_types::Role;

/// Which tools an agent may call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub stomatology: bool,
    #[serde(default)]
    pub doctors: bool,
    #[serde(default)]
    pub schedule: bool,
    #[serde(default)]
    pub appointments: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Token presented to the clinic API on every tool call.
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub stomatology: bool,
}

/// Snapshot of an agent, immutable for the duration of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    #[serde(default)]
    pub metadata: AgentMetadata,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_context_size() -> usize {
    4096
}

fn default_temperature() -> f32 {
    0.5
}

fn default_max_completion_tokens() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

impl AgentProfile {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            model: model.into(),
            api_key: api_key.into(),
            api_key_env: None,
            system_prompt: String::new(),
            user_prompt: String::new(),
            context_size: default_context_size(),
            temperature: default_temperature(),
            max_completion_tokens: default_max_completion_tokens(),
            metadata: AgentMetadata::default(),
            permissions: Permissions::default(),
            is_active: true,
        }
    }
}

/// One persisted user or assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogTurn {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub user_id: String,
    pub message: String,
    pub role: Role,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl DialogTurn {
    pub fn new(agent_id: Uuid, user_id: &str, role: Role, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            user_id: user_id.to_string(),
            message: message.into(),
            role,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogStats {
    pub total_dialogs: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processing,
    Completed,
    Failed,
}

/// Metadata row written once a document's chunks are in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFile {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// Stored name; also the payload value used to delete the file's points.
    pub file_name: String,
    pub original_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub collection_name: String,
    pub chunk_count: usize,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

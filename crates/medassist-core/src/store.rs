//! Metadata persistence for agents, dialog turns and knowledge files.
//!
//! [`LocalMetadataStore`] keeps everything in memory and, when opened with a path,
//! rewrites a single JSON document after each mutation. A mutation is applied to a
//! copy of the state first, so a failed write leaves memory and disk unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AgentError;
use crate::models::{AgentProfile, DialogStats, DialogTurn, KnowledgeFile};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_agent(&self, id: Uuid) -> Result<Option<AgentProfile>, AgentError>;

    async fn put_agent(&self, agent: AgentProfile) -> Result<(), AgentError>;

    async fn list_agents(&self) -> Result<Vec<AgentProfile>, AgentError>;

    /// Appends turns as one unit.
    async fn add_dialog_turns(&self, turns: Vec<DialogTurn>) -> Result<(), AgentError>;

    /// The most recent `limit` turns for (agent, user), oldest first.
    async fn list_dialog_turns(
        &self,
        agent_id: Uuid,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<DialogTurn>, AgentError>;

    /// Deletes turns for one user, or for every user of the agent when `user_id` is `None`.
    async fn delete_dialog_turns(
        &self,
        agent_id: Uuid,
        user_id: Option<&str>,
    ) -> Result<usize, AgentError>;

    async fn dialog_stats(&self, agent_id: Uuid) -> Result<DialogStats, AgentError>;

    async fn put_knowledge_file(&self, file: KnowledgeFile) -> Result<(), AgentError>;

    async fn get_knowledge_file(&self, id: Uuid) -> Result<Option<KnowledgeFile>, AgentError>;

    async fn list_knowledge_files(&self, agent_id: Uuid) -> Result<Vec<KnowledgeFile>, AgentError>;

    async fn delete_knowledge_file(&self, id: Uuid) -> Result<bool, AgentError>;

    async fn delete_knowledge_files(&self, agent_id: Uuid) -> Result<usize, AgentError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    agents: HashMap<Uuid, AgentProfile>,
    #[serde(default)]
    dialogs: Vec<DialogTurn>,
    #[serde(default)]
    files: Vec<KnowledgeFile>,
}

#[derive(Debug, Default)]
pub struct LocalMetadataStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl LocalMetadataStore {
    /// Store that lives only as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON file, created on first write if missing.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, AgentError> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await? {
            let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
                AgentError::StorageError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&data).map_err(|e| {
                AgentError::StorageError(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            StoreState::default()
        };

        log::info!(
            "Opened metadata store {} ({} agents, {} dialog turns, {} files)",
            path.display(),
            state.agents.len(),
            state.dialogs.len(),
            state.files.len()
        );

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, state: &StoreState) -> Result<(), AgentError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let data = serde_json::to_string_pretty(state)
            .map_err(|e| AgentError::StorageError(format!("Failed to serialize store: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await.map_err(|e| {
            AgentError::StorageError(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            AgentError::StorageError(format!("Failed to replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    async fn mutate<T>(&self, apply: impl FnOnce(&mut StoreState) -> T) -> Result<T, AgentError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let outcome = apply(&mut next);
        self.persist(&next).await?;
        *guard = next;
        Ok(outcome)
    }
}

#[async_trait]
impl MetadataStore for LocalMetadataStore {
    async fn get_agent(&self, id: Uuid) -> Result<Option<AgentProfile>, AgentError> {
        Ok(self.state.read().await.agents.get(&id).cloned())
    }

    async fn put_agent(&self, agent: AgentProfile) -> Result<(), AgentError> {
        self.mutate(|s| {
            s.agents.insert(agent.id, agent);
        })
        .await
    }

    async fn list_agents(&self) -> Result<Vec<AgentProfile>, AgentError> {
        let mut agents: Vec<_> = self.state.read().await.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn add_dialog_turns(&self, turns: Vec<DialogTurn>) -> Result<(), AgentError> {
        if turns.is_empty() {
            return Ok(());
        }
        self.mutate(|s| s.dialogs.extend(turns)).await
    }

    async fn list_dialog_turns(
        &self,
        agent_id: Uuid,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<DialogTurn>, AgentError> {
        let state = self.state.read().await;
        let mut turns: Vec<DialogTurn> = state
            .dialogs
            .iter()
            .filter(|t| t.agent_id == agent_id && t.user_id == user_id)
            .cloned()
            .collect();
        // Stable: turns stored in the same call keep their insertion order.
        turns.sort_by_key(|t| t.created_at);
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.split_off(skip))
    }

    async fn delete_dialog_turns(
        &self,
        agent_id: Uuid,
        user_id: Option<&str>,
    ) -> Result<usize, AgentError> {
        self.mutate(|s| {
            let before = s.dialogs.len();
            s.dialogs.retain(|t| {
                !(t.agent_id == agent_id && user_id.map_or(true, |u| t.user_id == u))
            });
            before - s.dialogs.len()
        })
        .await
    }

    async fn dialog_stats(&self, agent_id: Uuid) -> Result<DialogStats, AgentError> {
        let state = self.state.read().await;
        let turns = state.dialogs.iter().filter(|t| t.agent_id == agent_id);
        let mut stats = DialogStats::default();
        for turn in turns {
            stats.total_dialogs += 1;
            if stats.last_activity.map_or(true, |last| turn.created_at > last) {
                stats.last_activity = Some(turn.created_at);
            }
        }
        Ok(stats)
    }

    async fn put_knowledge_file(&self, file: KnowledgeFile) -> Result<(), AgentError> {
        self.mutate(|s| {
            s.files.retain(|f| f.id != file.id);
            s.files.push(file);
        })
        .await
    }

    async fn get_knowledge_file(&self, id: Uuid) -> Result<Option<KnowledgeFile>, AgentError> {
        Ok(self.state.read().await.files.iter().find(|f| f.id == id).cloned())
    }

    async fn list_knowledge_files(&self, agent_id: Uuid) -> Result<Vec<KnowledgeFile>, AgentError> {
        let state = self.state.read().await;
        let mut files: Vec<_> = state.files.iter().filter(|f| f.agent_id == agent_id).cloned().collect();
        files.sort_by_key(|f| f.created_at);
        Ok(files)
    }

    async fn delete_knowledge_file(&self, id: Uuid) -> Result<bool, AgentError> {
        self.mutate(|s| {
            let before = s.files.len();
            s.files.retain(|f| f.id != id);
            before != s.files.len()
        })
        .await
    }

    async fn delete_knowledge_files(&self, agent_id: Uuid) -> Result<usize, AgentError> {
        self.mutate(|s| {
            let before = s.files.len();
            s.files.retain(|f| f.agent_id != agent_id);
            before - s.files.len()
        })
        .await
    }
}

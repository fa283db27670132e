//! Configuration loader for YAML files and environment resolution

use std::env;
use std::path::Path;
use tokio::fs;

use crate::config::types::MedassistConfig;
use crate::errors::AgentError;

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<MedassistConfig, AgentError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            AgentError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::from_str(&content).await?;

        // Relative storage paths are taken from the config file's directory.
        if let (Some(storage), Some(base)) = (config.storage.path.as_mut(), path.parent()) {
            if storage.is_relative() {
                *storage = base.join(&*storage);
            }
        }

        Ok(config)
    }

    /// Load configuration from a YAML string
    pub async fn from_str(content: &str) -> Result<MedassistConfig, AgentError> {
        let mut config: MedassistConfig = serde_yaml::from_str(content)
            .map_err(|e| AgentError::ConfigError(format!("Failed to parse YAML config: {}", e)))?;

        Self::resolve_environment(&mut config);

        config.validate()?;

        log::debug!(
            "Loaded configuration with {} agents, embeddings model {}",
            config.agents.len(),
            config.embeddings.model
        );
        Ok(config)
    }

    fn resolve_environment(config: &mut MedassistConfig) {
        if config.embeddings.api_key.is_none() {
            config.embeddings.api_key = env_value(&config.embeddings.api_key_env);
        }

        if let Some(var) = &config.vector_store.api_key_env {
            config.vector_store.api_key = env_value(var);
        }

        for agent in &mut config.agents {
            if !agent.api_key.is_empty() {
                continue;
            }
            if let Some(key) = agent.api_key_env.as_deref().and_then(env_value) {
                agent.api_key = key;
            } else if agent.api_key_env.is_some() {
                log::warn!(
                    "Environment variable for agent {} API key is not set",
                    agent.id
                );
            }
        }
    }
}

fn env_value(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

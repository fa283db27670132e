//! Configuration module
//!
//! YAML configuration for the clinic assistant: provider endpoints, chunking and
//! retrieval tuning, the dialogue tool-round cap and the agent roster.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::AgentError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<MedassistConfig, AgentError> {
    ConfigLoader::from_file(path).await
}

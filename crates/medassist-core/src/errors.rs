//! Error types shared by the ingestion, retrieval and dialogue paths
//!
//! Every failure is reported through [`AgentError`]. Variants follow the source of
//! the failure so callers can decide what to do: `InvalidInput` and `NotFound` are
//! client-correctable, `ProviderError` and `ProviderContractViolation` come from an
//! upstream service, `Cancelled` means the caller gave up. [`ErrorPayload`] is the
//! shape handed to end users; it carries the kind and a short message only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Provider contract violation: {0}")]
    ProviderContractViolation(String),
    #[error("Completion returned no choices")]
    EmptyCompletion,
    #[error("Dialogue did not finish within {0} tool rounds")]
    ToolRoundsExceeded(usize),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

/// Stable classification of an [`AgentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ProviderError,
    ProviderContractViolation,
    NotFound,
    Cancelled,
    Internal,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::InvalidInput(_) => ErrorKind::InvalidInput,
            AgentError::ProviderError(_) | AgentError::ToolRoundsExceeded(_) => {
                ErrorKind::ProviderError
            }
            AgentError::ProviderContractViolation(_)
            | AgentError::EmptyCompletion
            | AgentError::ParsingError(_) => ErrorKind::ProviderContractViolation,
            AgentError::NotFound(_) => ErrorKind::NotFound,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::ConfigError(_) | AgentError::StorageError(_) | AgentError::IoError(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// User-visible error body returned by entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        // Query strings carry upstream access tokens.
        let err = err.without_url();
        if err.is_decode() {
            AgentError::ProviderContractViolation(err.to_string())
        } else {
            AgentError::ProviderError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::ParsingError(err.to_string())
    }
}

//! Knowledge ingestion, retrieval and tool-calling dialogue for clinic assistants.
//!
//! Each agent owns an isolated knowledge collection. Documents are chunked,
//! embedded and upserted into a vector index; questions are answered by a dialogue
//! loop that places retrieved snippets in the system prompt and lets the model call
//! the clinic tools its permissions allow.
//!
//! # Architecture Overview
//!
//! - **rag**: text chunker, batched embedding pipeline, vector index gateway
//!   (in-memory and Qdrant), query-side retrieval and the ingestion service
//! - **tools**: permission-filtered tool registry and the dispatcher that executes
//!   model-issued calls against the clinic API
//! - **dialogue**: prompt assembly with a token-budgeted history and the
//!   completion/tool-call state machine
//! - **service**: the `ask` entry point and dialog history operations
//! - **store**: metadata persistence for agents, dialog turns and knowledge files
//! - **config**: YAML configuration with environment-resolved secrets

pub mod config;
pub mod core_types;
pub mod deadline;
pub mod dialogue;
pub mod errors;
pub mod llm;
pub mod models;
pub mod rag;
pub mod service;
pub mod store;
pub mod tools;

pub use config::{ConfigLoader, MedassistConfig};
pub use dialogue::{DialogueOrchestrator, DialogueOutcome, DialogueSettings};
pub use errors::{AgentError, ErrorKind, ErrorPayload};
pub use llm::LLM;
pub use models::{AgentProfile, DialogTurn, KnowledgeFile, Permissions};
pub use rag::{KnowledgeService, UploadRequest};
pub use service::{AskRequest, AskResponse, AssistantService, AssistantSettings};
pub use store::{LocalMetadataStore, MetadataStore};

#[cfg(test)]
pub mod test_utils;

//! Tool registry and dispatcher.
//!
//! The set of tools an agent sees is derived from its permission flags, and the
//! dispatcher only executes names from that set. Argument problems and upstream
//! failures are returned to the model as `{"error": ...}` tool content so one bad
//! call never aborts the dialogue turn.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core_types::{Message, ToolCall};
use crate::deadline;
use crate::errors::AgentError;
use crate::llm::ToolMetadata;
use crate::models::{AgentProfile, Permissions};

pub mod clinic;
pub mod clinic_client;

pub use clinic::{CreateAppointmentTool, CreatePatientTool, GetDoctorsTool, GetScheduleTool};
pub use clinic_client::{ClinicClient, HttpClinicClient};

#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> ToolMetadata;

    /// Runs the tool on the raw JSON arguments sent by the model.
    async fn execute(&self, arguments: &str) -> Result<String, AgentError>;
}

/// Decodes a tool's arguments into its typed shape. Blank input counts as `{}`.
pub fn decode_arguments<T: DeserializeOwned>(tool: &str, raw: &str) -> Result<T, AgentError> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw)
        .map_err(|e| AgentError::InvalidInput(format!("Invalid arguments for {}: {}", tool, e)))
}

/// Tool specs enabled by a permission set.
pub fn available_tools(permissions: &Permissions) -> Vec<ToolMetadata> {
    let mut tools = Vec::new();
    if permissions.doctors {
        tools.push(clinic::get_doctors_spec());
    }
    if permissions.schedule {
        tools.push(clinic::get_schedule_spec());
    }
    if permissions.appointments {
        tools.push(clinic::create_appointment_spec());
        tools.push(clinic::create_patient_spec());
    }
    tools
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the clinic tools the agent's permissions allow.
    pub fn for_agent(agent: &AgentProfile, client: Arc<dyn ClinicClient>) -> Self {
        let token = agent.metadata.access_token.clone();
        let permissions = agent.permissions;
        let mut registry = Self::new();

        if permissions.doctors {
            registry.register(Arc::new(GetDoctorsTool::new(client.clone(), token.clone())));
        }
        if permissions.schedule {
            registry.register(Arc::new(GetScheduleTool::new(client.clone(), token.clone())));
        }
        if permissions.appointments {
            registry.register(Arc::new(CreateAppointmentTool::new(client.clone(), token.clone())));
            registry.register(Arc::new(CreatePatientTool::new(client, token)));
        }

        log::info!(
            "Agent {} has {} tools available: {:?}",
            agent.id,
            registry.len(),
            registry.order
        );
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.metadata().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn metadata(&self) -> Vec<ToolMetadata> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.metadata())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn error_content(message: impl std::fmt::Display) -> String {
    json!({ "error": message.to_string() }).to_string()
}

/// Executes model tool calls against the registered tools.
pub struct ToolDispatcher {
    registry: ToolRegistry,
    call_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    /// Specs advertised to the model; the only names [`execute`](Self::execute) runs.
    pub fn advertised(&self) -> Vec<ToolMetadata> {
        self.registry.metadata()
    }

    /// Produces exactly one tool message for `call`. Only cancellation is an `Err`.
    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<Message, AgentError> {
        let Some(tool) = self.registry.get(&call.name) else {
            log::warn!("Refusing tool call '{}': not available to this agent", call.name);
            return Ok(Message::tool(
                &call.id,
                error_content(format!("tool '{}' is not available", call.name)),
            ));
        };

        log::info!("Executing tool '{}' (call {})", call.name, call.id);
        let outcome = deadline::bounded(
            &format!("tool {}", call.name),
            self.call_timeout,
            cancel,
            tool.execute(&call.arguments),
        )
        .await;

        let content = match outcome {
            Ok(content) => content,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                log::warn!("Tool '{}' failed: {}", call.name, e);
                error_content(e)
            }
        };
        Ok(Message::tool(&call.id, content))
    }

    /// Runs all calls of one round concurrently; results keep the calls' order.
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, AgentError> {
        join_all(calls.iter().map(|call| self.execute(call, cancel)))
            .await
            .into_iter()
            .collect()
    }
}

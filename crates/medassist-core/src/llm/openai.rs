use crate::core_types::{CompletionRequest, CompletionResponse, Message, Role, ToolCall, Usage};
use crate::errors::AgentError;
use crate::llm::{ProviderFactory, ToolMetadata, LLM};
use crate::models::AgentProfile;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl OpenAIClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AgentError> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(self)
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": self.format_messages(&request.messages),
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = temp.into();
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }

        if !request.tools.is_empty() {
            log::debug!(
                "Sending {} tools: {:?}",
                request.tools.len(),
                request.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
            );
            body["tools"] = Value::Array(self.format_tools(&request.tools));
            body["tool_choice"] = "auto".into();
        }

        body
    }

    fn format_tools(&self, tools: &[ToolMetadata]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema
                    }
                })
            })
            .collect()
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let mut message = json!({
                    "role": msg.role.as_str(),
                    "content": msg.content
                });

                if let Role::Tool = msg.role {
                    if let Some(tool_call_id) = &msg.tool_call_id {
                        message["tool_call_id"] = json!(tool_call_id);
                    }
                }

                let calls = msg.requested_calls();
                if !calls.is_empty() {
                    let formatted: Vec<Value> = calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments
                                }
                            })
                        })
                        .collect();
                    message["tool_calls"] = json!(formatted);
                    if msg.content.is_empty() {
                        message["content"] = Value::Null;
                    }
                }

                message
            })
            .collect()
    }

    fn parse_response(&self, request: &CompletionRequest, response: Value) -> Result<CompletionResponse, AgentError> {
        let choices = response["choices"].as_array().ok_or_else(|| {
            AgentError::ProviderContractViolation("No choices in response".to_string())
        })?;

        let choices = choices
            .iter()
            .map(|choice| parse_choice_message(&choice["message"]))
            .collect::<Result<Vec<_>, _>>()?;

        let usage = if response["usage"].is_object() {
            let usage = serde_json::from_value::<Usage>(response["usage"].clone()).map_err(|e| {
                AgentError::ProviderContractViolation(format!("Malformed usage in response: {}", e))
            })?;
            Some(usage)
        } else {
            None
        };

        Ok(CompletionResponse {
            model: response["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
            choices,
            usage,
        })
    }
}

fn parse_choice_message(message: &Value) -> Result<Message, AgentError> {
    if !message.is_object() {
        return Err(AgentError::ProviderContractViolation(
            "Choice without a message".to_string(),
        ));
    }

    let content = message["content"].as_str().unwrap_or_default().to_string();

    let mut calls = Vec::new();
    if let Some(raw_calls) = message["tool_calls"].as_array() {
        for call in raw_calls {
            let function = &call["function"];
            let name = function["name"].as_str().ok_or_else(|| {
                AgentError::ProviderContractViolation("Tool call without a function name".to_string())
            })?;
            let arguments = match &function["arguments"] {
                Value::String(s) => s.clone(),
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            let id = call["id"].as_str().map(str::to_string).unwrap_or_else(|| {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            });
            calls.push(ToolCall::new(id, name, arguments));
        }
    }

    Ok(if calls.is_empty() {
        Message::assistant(content)
    } else {
        Message::assistant_with_calls(content, calls)
    })
}

#[async_trait]
impl LLM for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AgentError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request_body(request);

        log::debug!("OpenAI API request to {} ({} messages)", url, request.messages.len());
        for (i, msg) in request.messages.iter().enumerate() {
            log::debug!(
                "  Message #{}: role={:?}, tool_call_id={:?}, {} chars",
                i,
                msg.role,
                msg.tool_call_id,
                msg.content.chars().count()
            );
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        log::debug!("OpenAI API response ({}): {}", status, response_text);

        if !status.is_success() {
            return Err(AgentError::ProviderError(format!(
                "API request failed with status {}: {}",
                status, response_text
            )));
        }

        let response_json: Value = serde_json::from_str(&response_text).map_err(|e| {
            AgentError::ProviderContractViolation(format!("Invalid JSON response: {}", e))
        })?;

        self.parse_response(request, response_json)
    }
}

/// Builds an [`OpenAIClient`] per agent from its API key.
#[derive(Debug, Clone)]
pub struct OpenAIProviderFactory {
    api_base: String,
    timeout: Duration,
}

impl OpenAIProviderFactory {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.into(),
            timeout,
        }
    }
}

impl ProviderFactory for OpenAIProviderFactory {
    fn chat_client(&self, agent: &AgentProfile) -> Result<Arc<dyn LLM>, AgentError> {
        if agent.api_key.is_empty() {
            return Err(AgentError::ConfigError(format!(
                "Agent {} has no API key configured",
                agent.id
            )));
        }
        let client = OpenAIClient::new(agent.api_key.clone())
            .with_api_base(self.api_base.clone())
            .with_timeout(self.timeout)?;
        Ok(Arc::new(client))
    }
}

// src/test_utils/scripted_llm.rs
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::core_types::{CompletionRequest, CompletionResponse, Message, ToolCall, Usage};
use crate::errors::AgentError;
use crate::llm::LLM;

/// In-process chat provider that replays queued responses and records requests.
pub struct ScriptedLLM {
    responses: Mutex<VecDeque<Result<CompletionResponse, AgentError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLLM {
    pub fn new(responses: Vec<Result<CompletionResponse, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn text(content: &str) -> CompletionResponse {
        CompletionResponse {
            model: "gpt-4o-mini".to_string(),
            choices: vec![Message::assistant(content)],
            usage: Some(Usage { prompt_tokens: 20, completion_tokens: 10, total_tokens: 30 }),
        }
    }

    pub fn tool_calls(calls: &[(&str, &str, &str)]) -> CompletionResponse {
        let calls = calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect();
        CompletionResponse {
            model: "gpt-4o-mini".to_string(),
            choices: vec![Message::assistant_with_calls("", calls)],
            usage: Some(Usage { prompt_tokens: 15, completion_tokens: 5, total_tokens: 20 }),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLM for ScriptedLLM {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AgentError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::ProviderError("scripted LLM exhausted".to_string())))
    }
}

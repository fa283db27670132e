//! Tool-calling dialogue loop.
//!
//! The orchestrator owns the message sequence of one turn and moves through
//! `AwaitCompletion -> DispatchTools -> AwaitCompletion ... -> Done`. Each round of
//! tool calls appends the requesting assistant message followed by one tool message
//! per call. The number of rounds is capped; a model that keeps asking for tools
//! past the cap fails the turn with [`AgentError::ToolRoundsExceeded`].

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core_types::{CompletionRequest, Message, Usage};
use crate::deadline;
use crate::errors::AgentError;
use crate::llm::LLM;
use crate::models::AgentProfile;
use crate::tools::ToolDispatcher;

pub mod context;

pub use context::{build_messages, build_system_prompt, TokenEstimator};

#[derive(Debug, Clone)]
pub struct DialogueSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_tool_rounds: usize,
    pub completion_timeout: Duration,
}

impl DialogueSettings {
    pub fn for_agent(agent: &AgentProfile, max_tool_rounds: usize, completion_timeout: Duration) -> Self {
        Self {
            model: agent.model.clone(),
            temperature: agent.temperature,
            max_tokens: agent.max_completion_tokens,
            max_tool_rounds,
            completion_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DialogueOutcome {
    pub answer: String,
    /// Full sequence sent to and received from the model, final answer last.
    pub messages: Vec<Message>,
    pub usage: Usage,
    pub model: String,
    pub tool_rounds: usize,
}

enum DialogueState {
    AwaitCompletion,
    DispatchTools(Message),
    Done(Message),
}

pub struct DialogueOrchestrator {
    llm: Arc<dyn LLM>,
    tools: Arc<ToolDispatcher>,
    settings: DialogueSettings,
}

impl DialogueOrchestrator {
    pub fn new(llm: Arc<dyn LLM>, tools: Arc<ToolDispatcher>, settings: DialogueSettings) -> Self {
        Self { llm, tools, settings }
    }

    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<DialogueOutcome, AgentError> {
        let tool_specs = self.tools.advertised();
        let mut usage = Usage::default();
        let mut model = self.settings.model.clone();
        let mut rounds = 0;
        let mut state = DialogueState::AwaitCompletion;

        loop {
            state = match state {
                DialogueState::AwaitCompletion => {
                    let request = CompletionRequest {
                        model: self.settings.model.clone(),
                        temperature: Some(self.settings.temperature),
                        max_tokens: Some(self.settings.max_tokens),
                        messages: messages.clone(),
                        tools: tool_specs.clone(),
                    };

                    log::debug!(
                        "Requesting completion (round {}, {} messages, {} tools)",
                        rounds,
                        request.messages.len(),
                        request.tools.len()
                    );
                    let response = deadline::bounded(
                        "chat completion",
                        self.settings.completion_timeout,
                        cancel,
                        self.llm.complete(&request),
                    )
                    .await?;

                    if let Some(u) = &response.usage {
                        usage.accumulate(u);
                    }
                    model = response.model.clone();

                    let choice = response
                        .choices
                        .into_iter()
                        .next()
                        .ok_or(AgentError::EmptyCompletion)?;

                    if choice.requested_calls().is_empty() {
                        DialogueState::Done(choice)
                    } else {
                        DialogueState::DispatchTools(choice)
                    }
                }
                DialogueState::DispatchTools(assistant) => {
                    if rounds >= self.settings.max_tool_rounds {
                        log::error!(
                            "Model still requesting tools after {} rounds, giving up",
                            rounds
                        );
                        return Err(AgentError::ToolRoundsExceeded(self.settings.max_tool_rounds));
                    }
                    rounds += 1;

                    log::info!(
                        "Tool round {}: {} calls {:?}",
                        rounds,
                        assistant.requested_calls().len(),
                        assistant
                            .requested_calls()
                            .iter()
                            .map(|c| c.name.as_str())
                            .collect::<Vec<_>>()
                    );
                    let results = self
                        .tools
                        .execute_all(assistant.requested_calls(), cancel)
                        .await?;

                    messages.push(assistant);
                    messages.extend(results);
                    DialogueState::AwaitCompletion
                }
                DialogueState::Done(answer) => {
                    log::info!(
                        "Dialogue finished after {} tool rounds ({} tokens)",
                        rounds,
                        usage.total_tokens
                    );
                    let text = answer.content.clone();
                    messages.push(answer);
                    return Ok(DialogueOutcome {
                        answer: text,
                        messages,
                        usage,
                        model,
                        tool_rounds: rounds,
                    });
                }
            };
        }
    }
}

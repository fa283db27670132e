//! Prompt assembly for a dialogue turn.

use tiktoken_rs::CoreBPE;

use crate::core_types::{Message, Role};
use crate::models::{AgentProfile, DialogTurn};
use crate::rag::retrieval::KnowledgeSnippet;

/// Fixed per-message overhead used by the chat format.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Builds the system content: agent prompt, retrieved knowledge, additional instructions.
pub fn build_system_prompt(agent: &AgentProfile, knowledge: &[KnowledgeSnippet]) -> String {
    let mut prompt = String::new();

    if !agent.system_prompt.trim().is_empty() {
        prompt.push_str(agent.system_prompt.trim());
        prompt.push_str("\n\n");
    }

    if !knowledge.is_empty() {
        prompt.push_str("You have access to the following relevant information from the knowledge base:\n\n");
        for (i, snippet) in knowledge.iter().enumerate() {
            prompt.push_str(&format!(
                "Knowledge {} (Source: {}, Relevance: {:.2}):\n{}\n\n",
                i + 1,
                snippet.source,
                snippet.score,
                snippet.content
            ));
        }
        prompt.push_str(
            "Please use this information to provide accurate and helpful responses. \
             If the knowledge base doesn't contain relevant information, you can still provide general assistance.\n\n",
        );
    }

    if !agent.user_prompt.trim().is_empty() {
        prompt.push_str("Additional Instructions:\n");
        prompt.push_str(agent.user_prompt.trim());
        prompt.push_str("\n\n");
    }

    prompt.trim().to_string()
}

/// Token estimator for prompt budgeting; falls back to a chars/4 estimate when
/// the tokenizer cannot be loaded.
pub struct TokenEstimator {
    bpe: Option<CoreBPE>,
}

impl TokenEstimator {
    pub fn new() -> Self {
        let bpe = match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                log::warn!("Tokenizer unavailable, using character estimate: {}", e);
                None
            }
        };
        Self { bpe }
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count().div_ceil(4),
        }
    }

    pub fn message_tokens(&self, message: &Message) -> usize {
        self.count(&message.content) + MESSAGE_OVERHEAD_TOKENS
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles `[system?, history..., user]`. History keeps user and assistant turns
/// only and is trimmed oldest-first to fit the agent's context size minus its
/// completion budget. The system and new user messages are always kept.
pub fn build_messages(
    agent: &AgentProfile,
    knowledge: &[KnowledgeSnippet],
    history: &[DialogTurn],
    user_message: &str,
    estimator: &TokenEstimator,
) -> Vec<Message> {
    let system_prompt = build_system_prompt(agent, knowledge);
    let system = (!system_prompt.is_empty()).then(|| Message::system(system_prompt));
    let user = Message::user(user_message);

    let mut past: Vec<Message> = history
        .iter()
        .filter_map(|turn| match turn.role {
            Role::User => Some(Message::user(turn.message.clone())),
            Role::Assistant => Some(Message::assistant(turn.message.clone())),
            Role::System | Role::Tool => None,
        })
        .collect();

    let budget = agent
        .context_size
        .saturating_sub(agent.max_completion_tokens as usize);
    let fixed: usize = system.iter().chain(std::iter::once(&user))
        .map(|m| estimator.message_tokens(m))
        .sum();
    let mut history_tokens: usize = past.iter().map(|m| estimator.message_tokens(m)).sum();

    let mut dropped = 0;
    while !past.is_empty() && fixed + history_tokens > budget {
        let removed = past.remove(0);
        history_tokens -= estimator.message_tokens(&removed);
        dropped += 1;
    }
    if dropped > 0 {
        log::info!(
            "Dropped {} oldest history messages to fit context size {}",
            dropped,
            agent.context_size
        );
    }

    let mut messages = Vec::with_capacity(past.len() + 2);
    messages.extend(system);
    messages.extend(past);
    messages.push(user);
    messages
}

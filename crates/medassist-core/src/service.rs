//! Query entry point: one dialogue turn for an agent and a user.
//!
//! `ask` resolves the agent, retrieves knowledge, loads history, runs the
//! [`DialogueOrchestrator`] and persists the user and assistant turns once the
//! orchestrator has produced a final answer. A turn that fails or is cancelled
//! leaves the dialog history untouched.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core_types::Role;
use crate::dialogue::{build_messages, DialogueOrchestrator, DialogueSettings, TokenEstimator};
use crate::errors::AgentError;
use crate::llm::ProviderFactory;
use crate::models::{AgentProfile, DialogStats, DialogTurn};
use crate::rag::retrieval::{KnowledgeSnippet, KnowledgeSource};
use crate::store::MetadataStore;
use crate::tools::{ClinicClient, ToolDispatcher, ToolRegistry};

/// What a failed knowledge lookup does to the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
    /// Log the failure and answer without knowledge.
    #[default]
    BestEffort,
    /// Fail the turn with the retrieval error.
    Strict,
}

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub knowledge_limit: usize,
    pub score_threshold: f32,
    pub history_limit: usize,
    pub history_page_size: usize,
    pub max_tool_rounds: usize,
    pub completion_timeout: Duration,
    pub tool_timeout: Duration,
    pub retrieval_failure: RetrievalFailurePolicy,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            knowledge_limit: 3,
            score_threshold: 0.5,
            history_limit: 10,
            history_page_size: 50,
            max_tool_rounds: 5,
            completion_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(15),
            retrieval_failure: RetrievalFailurePolicy::BestEffort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AskRequest {
    pub agent_id: Uuid,
    pub user_id: String,
    pub message: String,
    pub use_knowledge: bool,
    pub knowledge_limit: Option<usize>,
    pub score_threshold: Option<f32>,
    pub history_limit: Option<usize>,
}

impl AskRequest {
    pub fn new(agent_id: Uuid, user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_id,
            user_id: user_id.into(),
            message: message.into(),
            use_knowledge: true,
            knowledge_limit: None,
            score_threshold: None,
            history_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub knowledge_used: Vec<KnowledgeSnippet>,
    pub tokens_used: u32,
    pub model: String,
    pub agent_id: Uuid,
    /// Id of the persisted assistant turn.
    pub dialog_id: Uuid,
    pub response_time_ms: u64,
}

pub struct AssistantService {
    store: Arc<dyn MetadataStore>,
    knowledge: Arc<dyn KnowledgeSource>,
    providers: Arc<dyn ProviderFactory>,
    clinic: Arc<dyn ClinicClient>,
    estimator: Arc<TokenEstimator>,
    settings: AssistantSettings,
}

impl AssistantService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        knowledge: Arc<dyn KnowledgeSource>,
        providers: Arc<dyn ProviderFactory>,
        clinic: Arc<dyn ClinicClient>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            store,
            knowledge,
            providers,
            clinic,
            estimator: Arc::new(TokenEstimator::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    async fn active_agent(&self, agent_id: Uuid) -> Result<AgentProfile, AgentError> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("agent {}", agent_id)))?;
        if !agent.is_active {
            return Err(AgentError::InvalidInput(format!("Agent {} is not active", agent_id)));
        }
        Ok(agent)
    }

    pub async fn ask(
        &self,
        request: AskRequest,
        cancel: &CancellationToken,
    ) -> Result<AskResponse, AgentError> {
        let started = Instant::now();

        if request.message.trim().is_empty() {
            return Err(AgentError::InvalidInput("Message cannot be empty".to_string()));
        }
        if request.user_id.trim().is_empty() {
            return Err(AgentError::InvalidInput("User id cannot be empty".to_string()));
        }
        let agent = self.active_agent(request.agent_id).await?;

        let knowledge = if request.use_knowledge {
            self.gather_knowledge(&agent, &request, cancel).await?
        } else {
            Vec::new()
        };

        let history_limit = request.history_limit.unwrap_or(self.settings.history_limit);
        let history = self
            .store
            .list_dialog_turns(agent.id, &request.user_id, history_limit)
            .await?;

        let messages = build_messages(&agent, &knowledge, &history, &request.message, &self.estimator);

        let llm = self.providers.chat_client(&agent)?;
        let tools = ToolDispatcher::new(
            ToolRegistry::for_agent(&agent, self.clinic.clone()),
            self.settings.tool_timeout,
        );
        let orchestrator = DialogueOrchestrator::new(
            llm,
            Arc::new(tools),
            DialogueSettings::for_agent(
                &agent,
                self.settings.max_tool_rounds,
                self.settings.completion_timeout,
            ),
        );

        let outcome = orchestrator.run(messages, cancel).await?;
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let user_turn = DialogTurn::new(agent.id, &request.user_id, Role::User, request.message.clone());
        let mut assistant_turn =
            DialogTurn::new(agent.id, &request.user_id, Role::Assistant, outcome.answer.clone());
        assistant_turn.metadata.insert("model".to_string(), json!(outcome.model));
        assistant_turn
            .metadata
            .insert("tokens_used".to_string(), json!(outcome.usage.total_tokens));
        assistant_turn
            .metadata
            .insert("knowledge_used".to_string(), json!(knowledge.len()));
        assistant_turn
            .metadata
            .insert("tool_rounds".to_string(), json!(outcome.tool_rounds));
        let dialog_id = assistant_turn.id;

        self.store
            .add_dialog_turns(vec![user_turn, assistant_turn])
            .await?;

        let response_time_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Agent {} answered user {} in {}ms ({} tokens, {} snippets)",
            agent.id,
            request.user_id,
            response_time_ms,
            outcome.usage.total_tokens,
            knowledge.len()
        );

        Ok(AskResponse {
            answer: outcome.answer,
            knowledge_used: knowledge,
            tokens_used: outcome.usage.total_tokens,
            model: outcome.model,
            agent_id: agent.id,
            dialog_id,
            response_time_ms,
        })
    }

    async fn gather_knowledge(
        &self,
        agent: &AgentProfile,
        request: &AskRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<KnowledgeSnippet>, AgentError> {
        let limit = request.knowledge_limit.unwrap_or(self.settings.knowledge_limit);
        let threshold = request.score_threshold.unwrap_or(self.settings.score_threshold);

        match self
            .knowledge
            .retrieve(agent.id, &request.message, limit, threshold, cancel)
            .await
        {
            Ok(snippets) => Ok(snippets),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => match self.settings.retrieval_failure {
                RetrievalFailurePolicy::BestEffort => {
                    log::warn!(
                        "Knowledge retrieval failed for agent {}, continuing without context: {}",
                        agent.id,
                        e
                    );
                    Ok(Vec::new())
                }
                RetrievalFailurePolicy::Strict => Err(e),
            },
        }
    }

    /// Most recent turns for (agent, user), oldest first.
    pub async fn dialog_history(
        &self,
        agent_id: Uuid,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DialogTurn>, AgentError> {
        self.require_agent(agent_id).await?;
        let limit = limit.unwrap_or(self.settings.history_page_size);
        self.store.list_dialog_turns(agent_id, user_id, limit).await
    }

    pub async fn delete_dialog_history(
        &self,
        agent_id: Uuid,
        user_id: Option<&str>,
    ) -> Result<usize, AgentError> {
        self.require_agent(agent_id).await?;
        let removed = self.store.delete_dialog_turns(agent_id, user_id).await?;
        log::info!("Deleted {} dialog turns for agent {}", removed, agent_id);
        Ok(removed)
    }

    pub async fn dialog_stats(&self, agent_id: Uuid) -> Result<DialogStats, AgentError> {
        self.require_agent(agent_id).await?;
        self.store.dialog_stats(agent_id).await
    }

    async fn require_agent(&self, agent_id: Uuid) -> Result<(), AgentError> {
        match self.store.get_agent(agent_id).await? {
            Some(_) => Ok(()),
            None => Err(AgentError::NotFound(format!("agent {}", agent_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLM;
    use crate::models::Permissions;
    use crate::rag::embeddings::{EmbeddingPipeline, EmbeddingPipelineConfig};
    use crate::rag::retrieval::KnowledgeRetriever;
    use crate::rag::vector_store::{collection_name, InMemoryVectorIndex, PointRecord, VectorIndex};
    use crate::store::LocalMetadataStore;
    use crate::test_utils::keyword_embedder::KeywordEmbedder;
    use crate::test_utils::recording_clinic::RecordingClinic;
    use crate::test_utils::scripted_llm::ScriptedLLM;
    use serde_json::Map;

    struct FixedProvider(Arc<ScriptedLLM>);

    impl ProviderFactory for FixedProvider {
        fn chat_client(&self, _agent: &AgentProfile) -> Result<Arc<dyn LLM>, AgentError> {
            Ok(self.0.clone())
        }
    }

    /// Knowledge source returning canned hits, filtered the way the retriever filters.
    struct CannedKnowledge(Vec<(f32, &'static str)>);

    #[async_trait::async_trait]
    impl KnowledgeSource for CannedKnowledge {
        async fn retrieve(
            &self,
            _agent_id: Uuid,
            _query: &str,
            limit: usize,
            score_threshold: f32,
            _cancel: &CancellationToken,
        ) -> Result<Vec<KnowledgeSnippet>, AgentError> {
            Ok(self
                .0
                .iter()
                .filter(|(score, _)| *score >= score_threshold)
                .take(limit)
                .map(|(score, content)| KnowledgeSnippet {
                    content: content.to_string(),
                    source: "faq.txt".to_string(),
                    score: *score,
                    metadata: Map::new(),
                })
                .collect())
        }
    }

    struct Fixture {
        service: AssistantService,
        store: Arc<LocalMetadataStore>,
        llm: Arc<ScriptedLLM>,
        agent: AgentProfile,
    }

    async fn fixture(
        knowledge: Arc<dyn KnowledgeSource>,
        responses: Vec<Result<crate::core_types::CompletionResponse, AgentError>>,
        settings: AssistantSettings,
    ) -> Fixture {
        let store = Arc::new(LocalMetadataStore::new());
        let mut agent = AgentProfile::new("gpt-4o-mini", "sk-test");
        agent.system_prompt = "You are the clinic assistant.".to_string();
        agent.permissions = Permissions { doctors: true, ..Default::default() };
        agent.metadata.access_token = "tok-1".to_string();
        store.put_agent(agent.clone()).await.unwrap();

        let llm = Arc::new(ScriptedLLM::new(responses));
        let service = AssistantService::new(
            store.clone(),
            knowledge,
            Arc::new(FixedProvider(llm.clone())),
            Arc::new(RecordingClinic::default()),
            settings,
        );
        Fixture { service, store, llm, agent }
    }

    fn failing_retriever() -> Arc<dyn KnowledgeSource> {
        let pipeline = Arc::new(EmbeddingPipeline::new(
            Arc::new(KeywordEmbedder::failing()),
            EmbeddingPipelineConfig::default(),
        ));
        Arc::new(KnowledgeRetriever::new(pipeline, Arc::new(InMemoryVectorIndex::new()), "agent_"))
    }

    #[tokio::test]
    async fn test_ask_uses_only_snippets_above_threshold() {
        let f = fixture(
            Arc::new(CannedKnowledge(vec![
                (0.8, "We are open 9:00-18:00 on weekdays."),
                (0.3, "Parking is behind the building."),
            ])),
            vec![Ok(ScriptedLLM::text("We are open 9:00-18:00 on weekdays."))],
            AssistantSettings::default(),
        )
        .await;

        let mut request = AskRequest::new(f.agent.id, "u1", "What are your hours?");
        request.knowledge_limit = Some(3);
        request.score_threshold = Some(0.5);
        request.history_limit = Some(10);

        let response = f.service.ask(request, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.knowledge_used.len(), 1);
        assert_eq!(response.knowledge_used[0].score, 0.8);
        assert_eq!(response.answer, "We are open 9:00-18:00 on weekdays.");
        assert_eq!(response.tokens_used, 30);
        assert_eq!(response.model, "gpt-4o-mini");

        let requests = f.llm.requests();
        let sent = &requests[0];
        assert!(sent.messages[0].content.contains("Relevance: 0.80"));
        assert!(!sent.messages[0].content.contains("Parking"));
        assert_eq!(sent.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_empty_context() {
        let f = fixture(
            failing_retriever(),
            vec![Ok(ScriptedLLM::text("I can still help with general questions."))],
            AssistantSettings::default(),
        )
        .await;

        let response = f
            .service
            .ask(AskRequest::new(f.agent.id, "u1", "What are your hours?"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.knowledge_used.is_empty());
        assert_eq!(response.answer, "I can still help with general questions.");
    }

    #[tokio::test]
    async fn test_strict_policy_surfaces_retrieval_failure() {
        let f = fixture(
            failing_retriever(),
            vec![Ok(ScriptedLLM::text("unused"))],
            AssistantSettings {
                retrieval_failure: RetrievalFailurePolicy::Strict,
                ..AssistantSettings::default()
            },
        )
        .await;

        let result = f
            .service
            .ask(AskRequest::new(f.agent.id, "u1", "hours?"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AgentError::ProviderError(_))));
        assert!(f.llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_ask_with_real_retriever_and_index() {
        let embedder = Arc::new(KeywordEmbedder::new(&["hours", "parking"]));
        let index = Arc::new(InMemoryVectorIndex::new());
        let pipeline = Arc::new(EmbeddingPipeline::new(embedder.clone(), EmbeddingPipelineConfig::default()));
        let retriever = Arc::new(KnowledgeRetriever::new(pipeline, index.clone(), "agent_"));

        let f = fixture(
            retriever,
            vec![Ok(ScriptedLLM::text("9 to 6."))],
            AssistantSettings::default(),
        )
        .await;

        let collection = collection_name("agent_", &f.agent.id);
        index.ensure_collection(&collection, 3).await.unwrap();
        let mut payload = Map::new();
        payload.insert("content".to_string(), json!("Opening hours are 9 to 6."));
        payload.insert("source".to_string(), json!("hours.txt"));
        index
            .upsert(&collection, vec![PointRecord::new(embedder.vector_for("hours"), payload)])
            .await
            .unwrap();

        let response = f
            .service
            .ask(AskRequest::new(f.agent.id, "u1", "What are your hours?"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.knowledge_used.len(), 1);
        assert_eq!(response.knowledge_used[0].source, "hours.txt");
    }

    #[tokio::test]
    async fn test_turns_persisted_and_replayed() {
        let f = fixture(
            Arc::new(CannedKnowledge(vec![])),
            vec![
                Ok(ScriptedLLM::text("Hello! How can I help?")),
                Ok(ScriptedLLM::text("Dr. Aigerim is available.")),
            ],
            AssistantSettings::default(),
        )
        .await;
        let cancel = CancellationToken::new();

        let first = f
            .service
            .ask(AskRequest::new(f.agent.id, "u1", "Hi"), &cancel)
            .await
            .unwrap();
        f.service
            .ask(AskRequest::new(f.agent.id, "u1", "Which dentist is free?"), &cancel)
            .await
            .unwrap();

        let history = f.service.dialog_history(f.agent.id, "u1", None).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Hi", "Hello! How can I help?", "Which dentist is free?", "Dr. Aigerim is available."]
        );
        assert_eq!(history[1].id, first.dialog_id);
        assert_eq!(history[1].metadata["tokens_used"], 30);

        let requests = f.llm.requests();
        let second_request = &requests[1];
        let roles: Vec<Role> = second_request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);

        let stats = f.service.dialog_stats(f.agent.id).await.unwrap();
        assert_eq!(stats.total_dialogs, 4);
        assert!(stats.last_activity.is_some());

        assert_eq!(f.service.delete_dialog_history(f.agent.id, Some("u1")).await.unwrap(), 4);
        assert!(f.service.dialog_history(f.agent.id, "u1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tool_round_reaches_clinic_and_persists_only_final_turns() {
        let f = fixture(
            Arc::new(CannedKnowledge(vec![])),
            vec![
                Ok(ScriptedLLM::tool_calls(&[("call_1", "get_doctors", r#"{"name":"Aigerim"}"#)])),
                Ok(ScriptedLLM::text("Dr. Aigerim works here.")),
            ],
            AssistantSettings::default(),
        )
        .await;

        let response = f
            .service
            .ask(AskRequest::new(f.agent.id, "u1", "Is Aigerim a doctor here?"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.tokens_used, 50);

        let turns = f.store.list_dialog_turns(f.agent.id, "u1", 50).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_agents() {
        let f = fixture(Arc::new(CannedKnowledge(vec![])), vec![], AssistantSettings::default()).await;
        let cancel = CancellationToken::new();

        let unknown = f
            .service
            .ask(AskRequest::new(Uuid::new_v4(), "u1", "Hi"), &cancel)
            .await;
        assert!(matches!(unknown, Err(AgentError::NotFound(_))));

        let mut inactive = f.agent.clone();
        inactive.is_active = false;
        f.store.put_agent(inactive).await.unwrap();
        let result = f.service.ask(AskRequest::new(f.agent.id, "u1", "Hi"), &cancel).await;
        assert!(matches!(result, Err(AgentError::InvalidInput(_))));

        let blank = f.service.ask(AskRequest::new(f.agent.id, "u1", "   "), &cancel).await;
        assert!(matches!(blank, Err(AgentError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_failed_turn_persists_nothing() {
        let f = fixture(
            Arc::new(CannedKnowledge(vec![])),
            (0..10)
                .map(|i| Ok(ScriptedLLM::tool_calls(&[(&*format!("c{}", i), "get_doctors", "{}")])))
                .collect(),
            AssistantSettings { max_tool_rounds: 2, ..AssistantSettings::default() },
        )
        .await;

        let result = f
            .service
            .ask(AskRequest::new(f.agent.id, "u1", "loop forever"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AgentError::ToolRoundsExceeded(2))));
        assert!(f.store.list_dialog_turns(f.agent.id, "u1", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_persists_nothing() {
        let f = fixture(
            Arc::new(CannedKnowledge(vec![])),
            vec![Ok(ScriptedLLM::text("never seen"))],
            AssistantSettings::default(),
        )
        .await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = f.service.ask(AskRequest::new(f.agent.id, "u1", "Hi"), &cancel).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(f.store.list_dialog_turns(f.agent.id, "u1", 50).await.unwrap().is_empty());
    }
}

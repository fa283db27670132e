//! Wires the core services to the HTTP collaborators named in the configuration.

use std::sync::Arc;
use std::time::Duration;

use medassist_core::config::MedassistConfig;
use medassist_core::errors::AgentError;
use medassist_core::llm::OpenAIProviderFactory;
use medassist_core::rag::embeddings::{EmbeddingPipeline, RestEmbeddingClient, RestEmbeddingConfig};
use medassist_core::rag::qdrant::{QdrantConfig, QdrantIndex};
use medassist_core::rag::retrieval::KnowledgeRetriever;
use medassist_core::rag::splitter::TextChunker;
use medassist_core::rag::vector_store::VectorIndex;
use medassist_core::rag::KnowledgeService;
use medassist_core::store::{LocalMetadataStore, MetadataStore};
use medassist_core::tools::HttpClinicClient;
use medassist_core::AssistantService;

pub struct App {
    pub knowledge: KnowledgeService,
    pub assistant: AssistantService,
}

impl App {
    pub async fn build(config: &MedassistConfig) -> Result<Self, AgentError> {
        let store: Arc<dyn MetadataStore> = match &config.storage.path {
            Some(path) => Arc::new(LocalMetadataStore::open(path.clone()).await?),
            None => Arc::new(LocalMetadataStore::new()),
        };
        for agent in &config.agents {
            store.put_agent(agent.clone()).await?;
        }

        let embedder = RestEmbeddingClient::new(RestEmbeddingConfig {
            api_base_url: config.embeddings.api_base.clone(),
            api_key: config.embeddings.api_key.clone(),
            model_name: config.embeddings.model.clone(),
            embedding_dimension: config.embeddings.resolved_dimension(),
            timeout_seconds: config.embeddings.timeout_secs,
        })?;
        let embeddings = Arc::new(EmbeddingPipeline::new(
            Arc::new(embedder),
            config.embeddings.pipeline_config(),
        ));

        let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(QdrantConfig {
            url: config.vector_store.url.clone(),
            api_key: config.vector_store.api_key.clone(),
            timeout_seconds: config.vector_store.timeout_secs,
        })?);
        let index_timeout = Duration::from_secs(config.vector_store.timeout_secs);
        let prefix = config.vector_store.collection_prefix.clone();

        let knowledge = KnowledgeService::new(
            store.clone(),
            TextChunker::new(config.chunking)?,
            embeddings.clone(),
            index.clone(),
            prefix.clone(),
        )
        .with_index_timeout(index_timeout);

        let retriever =
            KnowledgeRetriever::new(embeddings, index, prefix).with_search_timeout(index_timeout);
        let tools_timeout = Duration::from_secs(config.tools.timeout_secs);
        let assistant = AssistantService::new(
            store,
            Arc::new(retriever),
            Arc::new(OpenAIProviderFactory::new(
                config.llm.api_base.clone(),
                Duration::from_secs(config.llm.timeout_secs),
            )),
            Arc::new(HttpClinicClient::new(config.tools.base_url.clone(), tools_timeout)?),
            config.assistant_settings(),
        );

        log::debug!(
            "Services ready: {} agents, vector store {}",
            config.agents.len(),
            config.vector_store.url
        );
        Ok(Self { knowledge, assistant })
    }
}

//! Knowledge ingestion and retrieval: chunking, embedding, vector indexing and search.

pub mod embeddings;
pub mod ingest;
pub mod qdrant;
pub mod retrieval;
pub mod splitter;
pub mod vector_store;

pub use embeddings::{EmbeddingPipeline, EmbeddingPipelineConfig, EmbeddingProvider, RestEmbeddingClient, RestEmbeddingConfig};
pub use ingest::{KnowledgeService, KnowledgeStats, UploadRequest};
pub use qdrant::{QdrantConfig, QdrantIndex};
pub use retrieval::{KnowledgeRetriever, KnowledgeSnippet, KnowledgeSource};
pub use splitter::{Chunk, ChunkerConfig, TextChunker};
pub use vector_store::{InMemoryVectorIndex, VectorIndex};

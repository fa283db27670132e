pub mod mock_http_server;
pub mod mock_openai_server;
pub mod scripted_llm;
pub mod keyword_embedder;
pub mod recording_clinic;

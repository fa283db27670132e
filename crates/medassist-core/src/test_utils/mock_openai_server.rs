// src/test_utils/mock_openai_server.rs
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub enum MockReply {
    Json(Value),
    Status(u16, String),
}

impl MockReply {
    /// A chat completion whose single choice is a plain assistant answer.
    pub fn chat_text(content: &str) -> Self {
        MockReply::Json(json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 10, "total_tokens": 30}
        }))
    }

    /// A chat completion requesting the given `(id, name, arguments)` calls.
    pub fn chat_tool_calls(calls: &[(&str, &str, &str)]) -> Self {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|(id, name, arguments)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments}
                })
            })
            .collect();
        MockReply::Json(json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 15, "completion_tokens": 5, "total_tokens": 20}
        }))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct MockServerState {
    chat: Arc<Mutex<VecDeque<MockReply>>>,
    embeddings: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

fn reply(path: &str, next: Option<MockReply>) -> (StatusCode, Json<Value>) {
    match next {
        Some(MockReply::Json(body)) => (StatusCode::OK, Json(body)),
        Some(MockReply::Status(code, message)) => (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(json!({"error": {"message": message}})),
        ),
        None => {
            log::error!("Mock OpenAI server ran out of responses for {}", path);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": {"message": "no more mock responses"}})),
            )
        }
    }
}

fn record(state: &MockServerState, path: &str, headers: &HeaderMap, body: Value) {
    state.requests.lock().unwrap().push(RecordedRequest {
        path: path.to_string(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
}

async fn chat_completions_handler(
    State(state): State<MockServerState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    log::debug!("Mock OpenAI server received chat request: {}", payload);
    record(&state, "/v1/chat/completions", &headers, payload);
    let next = state.chat.lock().unwrap().pop_front();
    reply("/v1/chat/completions", next)
}

async fn embeddings_handler(
    State(state): State<MockServerState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    record(&state, "/v1/embeddings", &headers, payload);
    let next = state.embeddings.lock().unwrap().pop_front();
    reply("/v1/embeddings", next)
}

pub struct MockOpenAIServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    pub recorded_requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockOpenAIServer {
    pub async fn start(chat: Vec<MockReply>, embeddings: Vec<MockReply>) -> Self {
        let state = MockServerState {
            chat: Arc::new(Mutex::new(VecDeque::from(chat))),
            embeddings: Arc::new(Mutex::new(VecDeque::from(embeddings))),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let recorded_requests = state.requests.clone();

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .route("/v1/embeddings", post(embeddings_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Mock OpenAI server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                    log::info!("Mock OpenAI server shutting down gracefully.");
                })
                .await
                .unwrap_or_else(|e| {
                    log::error!("Mock OpenAI server error: {}", e);
                });
        });

        Self {
            addr,
            shutdown_tx,
            recorded_requests,
        }
    }

    /// Base URL including the `/v1` prefix, as clients expect it.
    pub fn api_base(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.recorded_requests.lock().unwrap().clone()
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("Mock OpenAI server shutdown signal already sent or receiver dropped.");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
}

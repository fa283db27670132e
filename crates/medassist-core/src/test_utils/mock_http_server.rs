// src/test_utils/mock_http_server.rs
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Canned reply for one method + path. Query strings are ignored when matching.
#[derive(Debug, Clone)]
pub struct MockRoute {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub body: Value,
}

impl MockRoute {
    pub fn new(method: &str, path: &str, status: u16, body: Value) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            status,
            body,
        }
    }

    pub fn json(method: &str, path: &str, body: Value) -> Self {
        Self::new(method, path, 200, body)
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl RecordedCall {
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| value.replace('+', " ").replace("%20", " "))
        })
    }
}

#[derive(Clone)]
struct MockServerState {
    routes: Arc<Vec<MockRoute>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

async fn handle(
    State(state): State<MockServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let body_json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let headers = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();

    state.calls.lock().unwrap().push(RecordedCall {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: body_json,
    });

    match state
        .routes
        .iter()
        .find(|r| r.method == method.as_str() && r.path == uri.path())
    {
        Some(route) => (
            StatusCode::from_u16(route.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(route.body.clone()),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": {"error": "Not found"}})),
        ),
    }
}

pub struct MockHttpServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockHttpServer {
    pub async fn start(routes: Vec<MockRoute>) -> Self {
        let state = MockServerState {
            routes: Arc::new(routes),
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let calls = state.calls.clone();

        let app = Router::new().fallback(handle).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Mock HTTP server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| log::error!("Mock HTTP server error: {}", e));
        });

        Self {
            addr,
            shutdown_tx,
            calls,
        }
    }

    pub fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("Mock HTTP server shutdown signal already sent or receiver dropped.");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
}

//! Mock JSON-RPC upstream for integration testing.
//!
//! Answers every POST with a configurable status, headers and body, and
//! records what it received so tests can assert on forwarding fidelity.

#![allow(dead_code)]

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock upstream server for testing.
///
/// Allows configuring:
/// - Results per method (single requests, echoed with the caller's id)
/// - A fixed raw body returned regardless of input
/// - Response status and extra headers
/// - A delay before answering (for timeout testing)
#[derive(Debug, Clone)]
pub struct MockUpstream {
    results: HashMap<String, Value>,
    raw_body: Option<String>,
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    delay: Option<Duration>,
}

#[derive(Debug)]
struct MockState {
    config: MockUpstream,
    request_count: RwLock<u32>,
    bodies: RwLock<Vec<Bytes>>,
    last_headers: RwLock<Option<HeaderMap>>,
}

impl MockUpstream {
    #[must_use]
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            raw_body: None,
            status: StatusCode::OK,
            headers: Vec::new(),
            delay: None,
        }
    }

    /// Answer calls to `method` with `result`.
    #[must_use]
    pub fn with_result(mut self, method: &str, result: Value) -> Self {
        self.results.insert(method.to_string(), result);
        self
    }

    /// Always answer with exactly `body`.
    #[must_use]
    pub fn with_raw_body(mut self, body: &str) -> Self {
        self.raw_body = Some(body.to_string());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers
            .push((HeaderName::from_static(name), HeaderValue::from_static(value)));
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Start the mock server and return its address and handle.
    pub async fn start(self) -> (SocketAddr, MockServerHandle) {
        let state = Arc::new(MockState {
            config: self,
            request_count: RwLock::new(0),
            bodies: RwLock::new(Vec::new()),
            last_headers: RwLock::new(None),
        });

        let app = Router::new()
            .route("/", post(handle_jsonrpc))
            .route("/rpc", post(handle_jsonrpc))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (
            addr,
            MockServerHandle {
                state,
                _handle: handle,
            },
        )
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the running mock server.
pub struct MockServerHandle {
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockServerHandle {
    pub async fn request_count(&self) -> u32 {
        *self.state.request_count.read().await
    }

    /// Raw bodies received, in arrival order.
    pub async fn bodies(&self) -> Vec<Bytes> {
        self.state.bodies.read().await.clone()
    }

    pub async fn last_headers(&self) -> Option<HeaderMap> {
        self.state.last_headers.read().await.clone()
    }
}

async fn handle_jsonrpc(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    {
        let mut count = state.request_count.write().await;
        *count += 1;
    }
    state.bodies.write().await.push(body.clone());
    *state.last_headers.write().await = Some(headers);

    let config = &state.config;

    if let Some(delay) = config.delay {
        tokio::time::sleep(delay).await;
    }

    let body = match &config.raw_body {
        Some(raw) => raw.clone(),
        None => answer(config, &body).to_string(),
    };

    let mut response = (config.status, body).into_response();
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    for (name, value) in &config.headers {
        response.headers_mut().append(name.clone(), value.clone());
    }
    response
}

fn answer(config: &MockUpstream, body: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(requests)) => requests.iter().map(|r| answer_one(config, r)).collect(),
        Ok(request) => answer_one(config, &request),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": format!("Parse error: {}", e)}
        }),
    }
}

fn answer_one(config: &MockUpstream, request: &Value) -> Value {
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();
    match config.results.get(method) {
        Some(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        None => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("Method not found: {}", method)}
        }),
    }
}

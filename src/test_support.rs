//! Test harness: real HTTP workers on ephemeral ports.
//!
//! No mocks are used. Workers are small axum servers running on the test's
//! runtime; a "dead" worker is a port nobody listens on.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Find an available TCP port for testing.
pub fn find_test_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Endpoint with nothing listening behind it.
pub fn closed_endpoint() -> String {
    format!("http://127.0.0.1:{}/", find_test_port())
}

#[derive(Clone)]
struct WorkerState {
    name: String,
    hits: Arc<AtomicUsize>,
    status: StatusCode,
    delay: Duration,
    padding: usize,
}

/// A running test worker.
pub struct TestWorker {
    pub endpoint: String,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestWorker {
    /// Starts a worker answering every POST with its name and the echoed body.
    pub async fn start(name: &str) -> Self {
        Self::start_with_status(name, StatusCode::OK).await
    }

    /// Starts a worker answering every POST with `status`.
    pub async fn start_with_status(name: &str, status: StatusCode) -> Self {
        Self::spawn(name, status, Duration::ZERO, 0).await
    }

    /// Starts a worker that sleeps for `delay` before answering with `status`.
    pub async fn start_slow(name: &str, status: StatusCode, delay: Duration) -> Self {
        Self::spawn(name, status, delay, 0).await
    }

    /// Starts a worker whose result carries `padding` extra bytes.
    pub async fn start_large(name: &str, padding: usize) -> Self {
        Self::spawn(name, StatusCode::OK, Duration::ZERO, padding).await
    }

    async fn spawn(name: &str, status: StatusCode, delay: Duration, padding: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let state = WorkerState {
            name: name.to_string(),
            hits: hits.clone(),
            status,
            delay,
            padding,
        };

        let app = axum::Router::new()
            .route("/", axum::routing::post(handle_rpc))
            .with_state(state);
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            endpoint: format!("http://{}/", addr),
            hits,
            handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Stops serving; the port starts refusing connections.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

// `Connection: close` keeps no pooled connection alive past `stop`.
async fn handle_rpc(
    State(state): State<WorkerState>,
    body: Bytes,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let mut result = json!({ "worker": state.name, "echo": request });
    if state.padding > 0 {
        result["padding"] = Value::String("x".repeat(state.padding));
    }
    let response = json!({
        "jsonrpc": "2.0",
        "id": request.get("id").cloned().unwrap_or(Value::Null),
        "result": result,
    });
    (
        state.status,
        [(header::CONNECTION, "close")],
        response.to_string(),
    )
}

/// A JSON-RPC request body for a forwarded method.
pub fn rpc_body(id: i64, method: &str) -> Bytes {
    Bytes::from(
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": { "n": id } }).to_string(),
    )
}

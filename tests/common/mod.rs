#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

#[derive(Clone, Default)]
struct MockState {
    hits: Arc<AtomicUsize>,
    retry_hits: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Tracks overlapping requests for the lifetime of one handler call.
struct InFlight(Arc<AtomicUsize>);

impl MockState {
    fn enter(&self) -> InFlight {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(Arc::clone(&self.in_flight))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
struct DataParams {
    error: Option<u16>,
    delay: Option<f64>,
    #[serde(default)]
    return_text: bool,
    /// Echoed back so callers can tell responses apart.
    n: Option<String>,
}

async fn root() -> Json<JsonValue> {
    Json(json!({"message": "Test server is running"}))
}

async fn data_handler(
    method: Method,
    State(state): State<MockState>,
    Query(params): Query<DataParams>,
    body: String,
) -> Response {
    let _guard = state.enter();

    if let Some(delay) = params.delay.filter(|delay| *delay > 0.0) {
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }

    if let Some(code) = params.error {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({"detail": format!("Simulated Error {code}")})))
            .into_response();
    }

    if params.return_text {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "This is plain text",
        )
            .into_response();
    }

    let mut payload = json!({"message": "success", "method": method.as_str()});
    if let Some(tag) = params.n {
        payload["n"] = json!(tag);
    }
    if let Ok(data) = serde_json::from_str::<JsonValue>(&body) {
        payload["received_data"] = data;
    }
    let status = if method == Method::POST || method == Method::PUT {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(payload)).into_response()
}

/// Fails twice with 503, then succeeds and resets.
async fn data_retry(State(state): State<MockState>) -> Response {
    let _guard = state.enter();
    let count = state.retry_hits.fetch_add(1, Ordering::SeqCst) + 1;
    if count <= 2 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"detail": "Service temporarily unavailable"})),
        )
            .into_response();
    }
    state.retry_hits.store(0, Ordering::SeqCst);
    Json(json!({"message": "success after retries", "attempt": count})).into_response()
}

async fn req1(State(state): State<MockState>) -> Json<JsonValue> {
    let _guard = state.enter();
    Json(json!({"id": 1, "data": "Response from /req1"}))
}

async fn req2(State(state): State<MockState>, body: String) -> Json<JsonValue> {
    let _guard = state.enter();
    let received = serde_json::from_str::<JsonValue>(&body).unwrap_or(JsonValue::Null);
    Json(json!({"id": 2, "status": "Created resource from /req2", "received": received}))
}

async fn req3(State(state): State<MockState>) -> Json<JsonValue> {
    let _guard = state.enter();
    Json(json!({"id": 3, "info": "Response from /req3"}))
}

async fn malformed(State(state): State<MockState>) -> Response {
    let _guard = state.enter();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        "{\"message\": \"truncated",
    )
        .into_response()
}

pub struct TestServer {
    pub base_url: String,
    state: MockState,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }
}

pub async fn spawn_server() -> TestServer {
    let state = MockState::default();

    let app = Router::new()
        .route("/", get(root))
        .route(
            "/data",
            get(data_handler)
                .post(data_handler)
                .put(data_handler)
                .delete(data_handler),
        )
        .route("/data_retry", get(data_retry))
        .route("/req1", get(req1))
        .route("/req2", post(req2))
        .route("/req3", get(req3))
        .route("/malformed", get(malformed))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        state,
        task,
    }
}

/// Mock server on its own runtime, for tests that drive the blocking handler.
pub struct BackgroundServer {
    pub server: TestServer,
    _runtime: tokio::runtime::Runtime,
}

impl std::ops::Deref for BackgroundServer {
    type Target = TestServer;

    fn deref(&self) -> &TestServer {
        &self.server
    }
}

pub fn spawn_background_server() -> BackgroundServer {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("must build server runtime");
    let server = runtime.block_on(spawn_server());
    BackgroundServer {
        server,
        _runtime: runtime,
    }
}

/// An address nothing listens on.
pub fn unused_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("must bind probe listener");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);
    format!("http://{address}")
}

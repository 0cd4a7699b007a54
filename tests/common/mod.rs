//! Shared fixtures: a daemon wired into a temp data root and mock upstream
//! servers standing in for model endpoints.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use loomchat::manager::runtime::LogDialog;
use loomchat::models::chat::SearchHit;
use loomchat::services::web_search::{SearchError, WebSearch};
use loomchat::{build_app, create_router, AppState, Config};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _dir: TempDir,
    _worker: tokio::task::JoinHandle<()>,
}

pub struct StubSearch;

#[async_trait]
impl WebSearch for StubSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Ok(vec![SearchHit {
            title: "stub result".to_string(),
            url: "https://example.test/1".to_string(),
            snippet: format!("snippet for {}", query),
            score: 0.9,
        }])
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

pub async fn create_test_app_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        data_root: dir.path().display().to_string(),
        ..Config::default()
    };
    tweak(&mut config);

    let (state, worker) = build_app(config, Arc::new(StubSearch), Arc::new(LogDialog))
        .await
        .unwrap();
    TestApp {
        router: create_router(state.clone()),
        state,
        _dir: dir,
        _worker: worker,
    }
}

pub async fn post_json(router: &Router, path: &str, body: Value) -> (u16, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

pub async fn get_path(router: &Router, path: &str) -> (u16, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

// ---- mock OpenAI-compatible upstream ----

#[derive(Clone)]
struct MockState {
    /// Scripted delta sequences, one per chat call, last one repeating.
    responses: Arc<Vec<Vec<String>>>,
    calls: Arc<Mutex<usize>>,
    delay: Duration,
    /// Basis-vector assignment for the embeddings endpoint.
    basis: Arc<Mutex<HashMap<String, usize>>>,
}

pub struct MockUpstream {
    /// Base URL ending in `/v1`, ready for a supplier config.
    pub base_url: String,
}

pub const EMBED_DIM: usize = 8;

/// Spawn an OpenAI-compatible mock on an ephemeral loopback port. Chat calls
/// stream the scripted deltas (with `delay` between them); the embeddings
/// endpoint returns canonical basis vectors in first-seen text order.
pub async fn spawn_mock_upstream(responses: Vec<Vec<&str>>, delay: Duration) -> MockUpstream {
    let state = MockState {
        responses: Arc::new(
            responses
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        ),
        calls: Arc::new(Mutex::new(0)),
        delay,
        basis: Arc::new(Mutex::new(HashMap::new())),
    };

    let router = Router::new()
        .route("/v1/models", get(mock_models))
        .route("/v1/chat/completions", post(mock_completions))
        .route("/v1/embeddings", post(mock_embeddings))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockUpstream {
        base_url: format!("http://{}/v1", addr),
    }
}

async fn mock_models() -> Json<Value> {
    Json(json!({ "data": [{ "id": "mock-model" }] }))
}

async fn mock_completions(State(state): State<MockState>) -> Response {
    let deltas = {
        let mut calls = state.calls.lock().unwrap();
        let index = (*calls).min(state.responses.len().saturating_sub(1));
        *calls += 1;
        state.responses[index].clone()
    };

    let mut events: Vec<String> = deltas
        .iter()
        .map(|delta| {
            format!(
                "data: {}\n\n",
                json!({ "choices": [{ "delta": { "content": delta }, "finish_reason": null }] })
            )
        })
        .collect();
    events.push("data: [DONE]\n\n".to_string());

    let delay = state.delay;
    let stream = futures::stream::unfold(
        (events.into_iter(), true),
        move |(mut events, first)| async move {
            let event = events.next()?;
            if !first {
                tokio::time::sleep(delay).await;
            }
            Some((
                Ok::<Bytes, std::convert::Infallible>(Bytes::from(event)),
                (events, false),
            ))
        },
    );

    axum::http::Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn mock_embeddings(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    let inputs: Vec<String> = body["input"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let mut basis = state.basis.lock().unwrap();
    let data: Vec<Value> = inputs
        .iter()
        .map(|text| {
            let next = basis.len();
            let index = *basis.entry(text.clone()).or_insert(next);
            let mut vector = vec![0.0f32; EMBED_DIM];
            vector[index % EMBED_DIM] = 1.0;
            json!({ "embedding": vector })
        })
        .collect();
    Json(json!({ "data": data }))
}

// ---- mock native runtime (local supplier / model manager) ----

/// Spawn a native-runtime mock (tags, streaming pull, delete) on an
/// ephemeral port; returns the port for `Config::runtime_port`.
pub async fn spawn_mock_runtime() -> u16 {
    let router = Router::new()
        .route("/api/tags", get(|| async { Json(json!({ "models": [] })) }))
        .route("/api/pull", post(mock_pull))
        .route("/api/delete", axum::routing::delete(|| async { Json(json!({})) }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    port
}

async fn mock_pull() -> Response {
    let lines = [
        json!({ "status": "pulling manifest" }),
        json!({ "status": "downloading", "total": 100, "completed": 40 }),
        json!({ "status": "downloading", "total": 100, "completed": 100 }),
        json!({ "status": "verifying sha256 digest" }),
        json!({ "status": "success" }),
    ];
    let body = lines
        .iter()
        .map(|l| format!("{}\n", l))
        .collect::<String>();
    axum::http::Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(Body::from(body))
        .unwrap()
}

/// Register a chat-capable supplier backed by the mock upstream.
pub async fn add_mock_supplier(app: &TestApp, name: &str, upstream: &MockUpstream) {
    let (status, _) = post_json(
        &app.router,
        "/model/add_supplier",
        json!({ "supplierName": name, "base_url": upstream.base_url }),
    )
    .await;
    assert_eq!(status, 200);
    let (status, _) = post_json(
        &app.router,
        "/model/add_model",
        json!({
            "supplierName": name,
            "name": "mock-model",
            "capabilities": { "chat": true },
        }),
    )
    .await;
    assert_eq!(status, 200);
}

/// Register an embedding-capable model on a supplier backed by the mock.
pub async fn add_mock_embedding_model(app: &TestApp, supplier: &str) {
    let (status, _) = post_json(
        &app.router,
        "/model/add_model",
        json!({
            "supplierName": supplier,
            "name": "mock-embed",
            "capabilities": { "embedding": true },
        }),
    )
    .await;
    assert_eq!(status, 200);
}

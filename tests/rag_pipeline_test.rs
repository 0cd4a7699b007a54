//! Knowledge base lifecycle: ingest, background parsing, retrieval, and
//! removal, against the mock embedding endpoint.

mod common;

use serde_json::{json, Value};
use std::time::Duration;

use common::{
    add_mock_embedding_model, add_mock_supplier, create_test_app_with, get_path, post_json,
    spawn_mock_upstream, TestApp,
};

const ALPHA: &str = "alpha paragraph about storage engines and compaction";
const BETA: &str = "beta paragraph describing cosine similarity retrieval";
const GAMMA: &str = "gamma paragraph covering background parse workers";

async fn rag_app() -> TestApp {
    // A small chunk cap keeps the three paragraphs from merging.
    let app = create_test_app_with(|c| c.chunk_chars = 64).await;
    let upstream = spawn_mock_upstream(vec![vec!["x"]], Duration::ZERO).await;
    add_mock_supplier(&app, "emb", &upstream).await;
    add_mock_embedding_model(&app, "emb").await;
    app
}

async fn create_base(app: &TestApp, name: &str) {
    let (status, _) = post_json(
        &app.router,
        "/rag/create_rag",
        json!({
            "name": name,
            "description": "test base",
            "supplierName": "emb",
            "model": "mock-embed",
        }),
    )
    .await;
    assert_eq!(status, 200);
}

async fn wait_for_terminal(app: &TestApp, base: &str) -> Value {
    for _ in 0..100 {
        let (_, docs) = post_json(&app.router, "/rag/list_docs", json!({ "name": base })).await;
        let doc = docs["message"][0].clone();
        let status = doc["status"].as_str().unwrap_or_default().to_string();
        if status == "parsed" || status == "failed" {
            return doc;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("document never reached a terminal state");
}

#[tokio::test]
async fn test_upload_parses_and_retrieves_by_cosine_rank() {
    let app = rag_app().await;
    create_base(&app, "kb").await;

    let doc_dir = tempfile::TempDir::new().unwrap();
    let path = doc_dir.path().join("notes.md");
    std::fs::write(&path, format!("{}\n\n{}\n\n{}\n", ALPHA, BETA, GAMMA)).unwrap();

    let (status, uploaded) = post_json(
        &app.router,
        "/rag/upload_doc",
        json!({ "name": "kb", "paths": [path.display().to_string()] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(uploaded["message"][0]["status"], "pending");

    // The pending record is visible immediately, no client-side sleep.
    let (_, docs) = post_json(&app.router, "/rag/list_docs", json!({ "name": "kb" })).await;
    assert_eq!(docs["message"].as_array().unwrap().len(), 1);

    let doc = wait_for_terminal(&app, "kb").await;
    assert_eq!(doc["status"], "parsed");
    assert_eq!(doc["chunk_count"], 3);
    assert!(doc["abstract"].as_str().unwrap().starts_with("alpha"));

    // The mock embedder assigns basis vectors in first-seen order, so a
    // query equal to the first chunk ranks it top; zero-score ties resolve
    // to the lower chunk id.
    let hits = app.state.rag.retrieve(&["kb".to_string()], ALPHA).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].text, ALPHA);
    assert_eq!(hits[1].text, BETA);

    let again = app.state.rag.retrieve(&["kb".to_string()], ALPHA).await.unwrap();
    let order: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    let order_again: Vec<&str> = again.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(order, order_again);

    // Chunk texts are served back with the document.
    let doc_id = doc["id"].as_str().unwrap();
    let (status, content) = get_path(
        &app.router,
        &format!("/rag/get_doc_content?name=kb&doc_id={}", doc_id),
    )
    .await;
    assert_eq!(status, 200);
    let chunks = content["message"]["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0]["text"], ALPHA);

    // Removing the document removes its chunks from retrieval.
    let (status, _) = get_path(
        &app.router,
        &format!("/rag/remove_doc?name=kb&doc_ids={}", doc_id),
    )
    .await;
    assert_eq!(status, 200);
    let hits = app.state.rag.retrieve(&["kb".to_string()], ALPHA).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_unreadable_document_fails_without_blocking_others() {
    let app = rag_app().await;
    create_base(&app, "kb").await;

    let doc_dir = tempfile::TempDir::new().unwrap();
    let good = doc_dir.path().join("good.txt");
    std::fs::write(&good, "A single good sentence.").unwrap();
    let missing = doc_dir.path().join("does-not-exist.txt");

    let (status, _) = post_json(
        &app.router,
        "/rag/upload_doc",
        json!({
            "name": "kb",
            "paths": [missing.display().to_string(), good.display().to_string()],
        }),
    )
    .await;
    assert_eq!(status, 200);

    for _ in 0..100 {
        let (_, docs) = post_json(&app.router, "/rag/list_docs", json!({ "name": "kb" })).await;
        let all_terminal = docs["message"]
            .as_array()
            .unwrap()
            .iter()
            .all(|d| d["status"] == "parsed" || d["status"] == "failed");
        if all_terminal {
            let docs = docs["message"].as_array().unwrap().clone();
            let failed = docs.iter().find(|d| d["status"] == "failed").unwrap();
            let parsed = docs.iter().find(|d| d["status"] == "parsed").unwrap();
            assert!(failed["failure"].as_str().unwrap().contains("cannot read"));
            assert_eq!(parsed["chunk_count"], 1);
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("documents never reached terminal states");
}

#[tokio::test]
async fn test_create_rag_rejects_non_embedding_model() {
    let app = rag_app().await;
    let (status, envelope) = post_json(
        &app.router,
        "/rag/create_rag",
        json!({
            "name": "bad",
            "supplierName": "emb",
            "model": "mock-model",
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert!(envelope["error_msg"].as_str().unwrap().contains("embedding"));
}

#[tokio::test]
async fn test_duplicate_base_conflicts() {
    let app = rag_app().await;
    create_base(&app, "kb").await;
    let (status, _) = post_json(
        &app.router,
        "/rag/create_rag",
        json!({ "name": "kb", "supplierName": "emb", "model": "mock-embed" }),
    )
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_modify_rag_rejects_model_change_with_parsed_docs() {
    let app = rag_app().await;
    create_base(&app, "kb").await;

    let doc_dir = tempfile::TempDir::new().unwrap();
    let path = doc_dir.path().join("one.txt");
    std::fs::write(&path, "A sentence to embed.").unwrap();
    post_json(
        &app.router,
        "/rag/upload_doc",
        json!({ "name": "kb", "paths": [path.display().to_string()] }),
    )
    .await;
    wait_for_terminal(&app, "kb").await;

    let (status, _) = post_json(
        &app.router,
        "/rag/modify_rag",
        json!({ "name": "kb", "supplierName": "emb", "model": "other-embed" }),
    )
    .await;
    assert_eq!(status, 409);

    // Description-only changes stay allowed.
    let (status, _) = post_json(
        &app.router,
        "/rag/modify_rag",
        json!({
            "name": "kb",
            "description": "new words",
            "supplierName": "emb",
            "model": "mock-embed",
        }),
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_remove_rag_round_trip() {
    let app = rag_app().await;
    create_base(&app, "kb").await;

    let (_, listed) = post_json(&app.router, "/rag/list_rag", json!({})).await;
    assert_eq!(listed["message"].as_array().unwrap().len(), 1);

    let (status, _) = post_json(&app.router, "/rag/remove_rag", json!({ "name": "kb" })).await;
    assert_eq!(status, 200);

    let (_, listed) = post_json(&app.router, "/rag/list_rag", json!({})).await;
    assert!(listed["message"].as_array().unwrap().is_empty());

    let (status, _) = post_json(&app.router, "/rag/list_docs", json!({ "name": "kb" })).await;
    assert_eq!(status, 404);
}

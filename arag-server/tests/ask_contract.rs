use std::sync::Arc;

use arag_core::{
    Generator, InMemorySearchBackend, LoopConfig, OutputSchema, Orchestrator, RagError, Result,
    RetrievalParameters, Strategy,
};
use arag_server::{app_router, corpus::parse_corpus, server::AppState};
use async_trait::async_trait;
use serde_json::{Value, json};

const CORPUS: &str = r#"{"content":"Parking fee is 5 per hour","source":"guide.pdf","page_number":1,"keywords":"parking"}
{"content":"Parking is free for members after 6pm","source":"guide.pdf","page_number":2,"keywords":"parking"}
{"content":"Free wifi available","source":"faq.pdf","page_number":4}
"#;

/// Answers every question the same way and grades every answer as adequate.
struct FixedGenerator;

#[async_trait]
impl Generator for FixedGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok("Parking costs 5 per hour and is free for members after 6pm.".to_string())
    }

    async fn complete_structured(&self, _prompt: &str, schema: &OutputSchema) -> Result<Value> {
        match schema.name {
            "answer_grade" => Ok(json!({"relevance": 0.9, "uses_citations": true, "sufficient": true})),
            "grounding_grade" => Ok(json!({"hallucination": false})),
            other => Err(RagError::generation(format!("unexpected schema {other}"))),
        }
    }
}

async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
    let backend = InMemorySearchBackend::new();
    backend.add_documents(parse_corpus(CORPUS).expect("corpus parses")).await.expect("index corpus");

    let config = LoopConfig::builder()
        .retrieval(RetrievalParameters { strategy: Strategy::Lexical, ..Default::default() })
        .build()
        .expect("valid config");
    let orchestrator = Orchestrator::builder()
        .config(config)
        .generator(Arc::new(FixedGenerator))
        .search_backend(Arc::new(backend))
        .build()
        .expect("orchestrator");
    let app = app_router(AppState::new(orchestrator));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    (format!("http://{}", addr), handle)
}

async fn create_session(client: &reqwest::Client, base: &str) -> String {
    let created: Value = client
        .post(format!("{}/api/session", base))
        .send()
        .await
        .expect("session create response")
        .json()
        .await
        .expect("session json");
    created
        .get("session_id")
        .and_then(Value::as_str)
        .expect("session_id field")
        .to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    let (base, handle) = spawn_server().await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .expect("health response")
        .json()
        .await
        .expect("health json");
    assert_eq!(body["status"], "ok");

    handle.abort();
}

#[tokio::test]
async fn ask_returns_answer_with_citations() {
    let (base, handle) = spawn_server().await;
    let client = reqwest::Client::new();
    let session_id = create_session(&client, &base).await;

    let response = client
        .post(format!("{}/api/ask/{}", base, session_id))
        .json(&json!({ "user_input": "parking fee rules" }))
        .send()
        .await
        .expect("ask response");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("answer json");
    assert_eq!(body["session_id"], session_id.as_str());
    assert_eq!(body["answer_text"], "Parking costs 5 per hour and is free for members after 6pm.");
    assert_eq!(body["round_count"], 0);

    let citations = body["citations"].as_array().expect("citations array");
    assert_eq!(citations.len(), 2);
    assert!(citations.iter().all(|c| c["source"] == "guide.pdf"));
    assert_eq!(body["quality"]["answer_relevance"], 0.9);

    handle.abort();
}

#[tokio::test]
async fn answered_session_is_checkpointed() {
    let (base, handle) = spawn_server().await;
    let client = reqwest::Client::new();
    let session_id = create_session(&client, &base).await;

    client
        .post(format!("{}/api/ask/{}", base, session_id))
        .json(&json!({ "user_input": "parking fee rules" }))
        .send()
        .await
        .expect("ask response");

    let state: Value = client
        .get(format!("{}/api/session/{}", base, session_id))
        .send()
        .await
        .expect("session response")
        .json()
        .await
        .expect("session json");
    assert_eq!(state["stage"], "TERMINAL");
    assert_eq!(state["original_query"], "parking fee rules");

    handle.abort();
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (base, handle) = spawn_server().await;

    let response = reqwest::get(format!("{}/api/session/{}", base, "no-such-session"))
        .await
        .expect("session response");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    handle.abort();
}

#[tokio::test]
async fn blank_input_is_rejected() {
    let (base, handle) = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/ask/{}", base, "s1"))
        .json(&json!({ "user_input": "   " }))
        .send()
        .await
        .expect("ask response");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.expect("error json");
    assert!(body["error"].as_str().unwrap().contains("user_input"));

    handle.abort();
}

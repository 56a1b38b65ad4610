use std::net::TcpListener as StdTcpListener;
use std::time::{Duration, Instant};

use lib_survey::connections::memory_store::MemoryStore;
use lib_survey::{ConnectionPhase, ServiceSettings, StoreError};
use project_tests::{TestServer, fast_settings};
use reqwest::StatusCode;
use serde_json::{Value, json};

fn alice() -> Value {
    json!({
        "userName": "Alice",
        "userEmail": "a@x.com",
        "selectedProjects": [1, 2],
        "comments": {"note": "hi"}
    })
}

async fn post_survey(server: &TestServer, body: &Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(server.url("/api/submit-survey"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn scenario_a_submission_is_created() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();

    let (status, body) = post_survey(&server, &alice()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Survey submitted successfully");
    assert_eq!(body["survey"]["userEmail"], "a@x.com");
    assert!(body["survey"]["_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body["survey"]["submittedAt"].is_string());
    assert!(body["survey"]["createdAt"].is_string());
    assert!(body["survey"]["updatedAt"].is_string());

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_b_store_down_is_503() {
    let store = MemoryStore::new();
    store.set_reachable(false);
    let server = TestServer::spawn(store, fast_settings()).await.unwrap();

    let started = Instant::now();
    let (status, body) = post_survey(&server, &alice()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["message"].as_str().unwrap().contains("Database connection error"));
    assert!(body.get("error").is_none());
    // 3 attempts of a 100 ms selection wait, 2 delays of 20 ms.
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(server.store.records().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_c_liveness_does_not_touch_store() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();

    let response = reqwest::get(server.url("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "Hello World!");
    assert_eq!(server.store.insert_count(), 0);
    assert_eq!(server.store.probe_count(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn successful_write_is_stored_exactly_once() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();

    let (status, body) = post_survey(&server, &alice()).await;
    assert_eq!(status, StatusCode::CREATED);

    let records = server.store.records();
    assert_eq!(records.len(), 1);
    let stored = &records[0];
    assert_eq!(body["survey"]["_id"], stored.id.as_str());
    assert_eq!(stored.user_name.as_deref(), Some("Alice"));
    assert_eq!(stored.user_email.as_deref(), Some("a@x.com"));
    assert_eq!(stored.selected_projects, vec![1, 2]);
    assert_eq!(stored.comments, Some(json!({"note": "hi"})));

    server.shutdown().await;
}

#[tokio::test]
async fn transient_failures_below_budget_create_one_record() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();
    server
        .store
        .fail_next_insert(StoreError::Unavailable("connection reset by peer".into()));
    server
        .store
        .fail_next_insert_after_apply(StoreError::DurabilityTimeout("waiting for replication timed out".into()));

    let (status, body) = post_survey(&server, &alice()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(server.store.insert_count(), 3);
    let records = server.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(body["survey"]["_id"], records[0].id.as_str());

    server.shutdown().await;
}

#[tokio::test]
async fn exhausted_rejections_are_500_with_detail() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();
    for _ in 0..3 {
        server
            .store
            .fail_next_insert(StoreError::Rejected("Document failed validation".into()));
    }

    let started = Instant::now();
    let (status, body) = post_survey(&server, &alice()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Error submitting survey");
    assert!(body["error"].as_str().unwrap().contains("Document failed validation"));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(server.store.records().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_body_is_400_without_store_access() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/api/submit-survey"))
        .header("content-type", "application/json")
        .body("{\"userName\":")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Error submitting survey");
    assert!(body["error"].is_string());

    let (status, _) = post_survey(&server, &json!(["not", "an", "object"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(server.store.insert_count(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_disconnect_and_accepts_writes() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();
    let manager = server.service.manager();

    server.store.simulate_disconnect();
    assert!(
        manager
            .wait_for_phase(ConnectionPhase::Disconnected, Duration::from_secs(1))
            .await
    );
    // One reconnect delay is 20 ms.
    assert!(
        manager
            .wait_for_phase(ConnectionPhase::Connected, Duration::from_millis(500))
            .await
    );
    assert_eq!(server.store.connect_count(), 2);

    let (status, _) = post_survey(&server, &alice()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(server.store.records().len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn background_failures_do_not_affect_writes() {
    // Nothing listens on this port once the listener is dropped.
    let dead_port = StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let settings = ServiceSettings {
        warmup_interval: Duration::from_millis(10),
        ping_interval: Duration::from_millis(10),
        self_ping_url: Some(format!("http://127.0.0.1:{}/", dead_port)),
        ..fast_settings()
    };
    let store = MemoryStore::new();
    let server = TestServer::spawn_connected(store, settings).await.unwrap();
    server.store.set_probe_failing(true);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (status, body) = post_survey(&server, &alice()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["survey"]["userEmail"], "a@x.com");
    assert!(server.store.probe_count() >= 1);
    assert_eq!(server.service.phase(), ConnectionPhase::Connected);

    server.shutdown().await;
}

#[tokio::test]
async fn cors_allows_listed_and_preview_origins_only() {
    let server = TestServer::spawn_connected(MemoryStore::new(), fast_settings())
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let preflight = |origin: &'static str| {
        client
            .request(reqwest::Method::OPTIONS, server.url("/api/submit-survey"))
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .send()
    };

    let allowed = preflight("http://localhost:3000").await.unwrap();
    assert_eq!(
        allowed.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );

    let preview = preflight("https://survey-abc123-team.vercel.app").await.unwrap();
    assert!(preview.headers().get("access-control-allow-origin").is_some());

    let denied = preflight("https://elsewhere.example").await.unwrap();
    assert!(denied.headers().get("access-control-allow-origin").is_none());

    server.shutdown().await;
}

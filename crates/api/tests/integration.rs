//! Admin surface integration tests over a real listener.

use std::sync::Arc;

use murmur_api::{create_router, AppState};
use murmur_common::Config;

async fn spawn_server() -> (String, Arc<AppState>) {
    let dir = tempfile::TempDir::new().unwrap();
    let config = Config {
        db_path: dir
            .path()
            .join("murmur.db")
            .to_string_lossy()
            .into_owned(),
        ..Config::default()
    };
    // Leak the tempdir so the database outlives this function.
    std::mem::forget(dir);

    let state = Arc::new(AppState::build(config).await.unwrap());
    let router = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn health_reports_ok() {
    let (base, _state) = spawn_server().await;
    let body: serde_json::Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn stats_exposes_component_counters() {
    let (base, _state) = spawn_server().await;
    let body: serde_json::Value = reqwest::get(format!("{base}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["orchestrator"]["initialized"], true);
    assert_eq!(body["orchestrator"]["agent_count"], 5);
    assert!(body["rate_limiter"]["global_tokens"].is_number());
}

#[tokio::test]
async fn approving_an_unknown_request_is_404() {
    let (base, _state) = spawn_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/approve/approval_missing"))
        .json(&serde_json::json!({ "approved": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn memory_stats_lists_all_tiers() {
    let (base, _state) = spawn_server().await;
    let body: serde_json::Value = reqwest::get(format!("{base}/memory/U1/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tiers = body["tiers"].as_array().unwrap();
    assert_eq!(tiers.len(), 3);
    let names: Vec<&str> = tiers
        .iter()
        .map(|tier| tier["tier"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"core"));
    assert!(names.contains(&"recall"));
    assert!(names.contains(&"archival"));
}

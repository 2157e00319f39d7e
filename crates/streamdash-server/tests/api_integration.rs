#[allow(dead_code)]
mod common;

use std::sync::Arc;

use serde_json::json;

use streamdash_server::config::AuthFileConfig;

use common::{GatedSource, TestServer, eventually, get_json, temp_db, test_config};

#[tokio::test]
async fn health_and_ready_respond() {
    let (_dir, path) = temp_db();
    let server = TestServer::with_source(test_config(&path, None), GatedSource::open(0)).await;

    let body = get_json(&reqwest::Client::new(), &server.url("/health")).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["layers"].as_array().unwrap().len(), 3);

    let resp = reqwest::get(server.url("/ready")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ready");
}

#[tokio::test]
async fn api_requires_bearer_token_when_configured() {
    let (_dir, path) = temp_db();
    let mut config = test_config(&path, None);
    config.auth = AuthFileConfig {
        bearer_token: Some("test-token".to_string()),
    };
    let server = TestServer::with_source(config, GatedSource::open(0)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(server.url("/api/v1/dashboard/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(server.url("/api/v1/dashboard/stats"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(server.url("/api/v1/dashboard/stats"))
        .bearer_auth("test-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Health stays open.
    let resp = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn cold_start_serves_placeholder_while_generating() {
    let (_dir, path) = temp_db();
    let source = GatedSource::closed(7);
    let server = TestServer::with_source(test_config(&path, None), Arc::clone(&source)).await;

    let body = get_json(&reqwest::Client::new(), &server.url("/api/v1/dashboard/stats")).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["cached"], false);
    assert_eq!(body["generating"], true);
    assert_eq!(body["refreshing"], true);
    assert!(body["cache_age_seconds"].is_null());
    assert_eq!(body["stats"]["total_users"], 0);
    assert_eq!(body["stats"]["live_sessions"], json!([]));
    assert_eq!(body["stats"]["most_popular_content"], json!([]));
    eventually("placeholder refresh to start", || source.calls() == 1).await;
}

#[tokio::test]
async fn post_refresh_validates_layers() {
    let (_dir, path) = temp_db();
    let server = TestServer::with_source(test_config(&path, None), GatedSource::open(0)).await;
    let client = reqwest::Client::new();
    let url = server.url("/api/v1/dashboard/refresh");

    let resp = client.post(&url).json(&json!({"layers": []})).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "layers must not be empty");

    let resp = client
        .post(&url)
        .json(&json!({"layers": ["live", "everything"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("everything"));

    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    let resp = client
        .post(&url)
        .json(&json!({"layers": ["panels", "live"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["layer"], "panels");
    assert_eq!(body["results"][0]["outcome"], "started");
    assert_eq!(body["results"][1]["layer"], "live");
}

#[tokio::test]
async fn refresh_status_lists_every_layer() {
    let (_dir, path) = temp_db();
    let server = TestServer::with_source(test_config(&path, None), GatedSource::open(0)).await;
    let body = get_json(
        &reqwest::Client::new(),
        &server.url("/api/v1/dashboard/refresh-status"),
    )
    .await;
    let layers: Vec<_> = body["layers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["layer"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(layers, vec!["live", "watch", "panels"]);
    assert_eq!(body["layers"][0]["has_snapshot"], false);
    assert_eq!(body["layers"][0]["ttl_seconds"], 30);
    assert_eq!(body["layers"][1]["ttl_seconds"], 86_400);
}

#[tokio::test]
async fn unknown_api_route_is_json_404() {
    let (_dir, path) = temp_db();
    let server = TestServer::with_source(test_config(&path, None), GatedSource::open(0)).await;
    let resp = reqwest::get(server.url("/api/v1/dashboard/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "no such endpoint");
}

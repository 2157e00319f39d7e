#[allow(dead_code)]
mod common;

use std::sync::Arc;

use streamdash_server::db::Database;

use common::{GatedSource, TestServer, get_json, temp_db, test_config, wait_for_cached};

#[tokio::test]
async fn snapshot_survives_restart_before_any_refresh() {
    let (_dir, path) = temp_db();
    let client = reqwest::Client::new();

    {
        let server = TestServer::with_source(test_config(&path, None), GatedSource::open(42)).await;
        let body = wait_for_cached(&client, &server.url("/api/v1/dashboard/stats")).await;
        assert_eq!(body["stats"]["total_users"], 42);
    }

    let rows = Database::open(&path)
        .unwrap()
        .load_cache_rows()
        .await
        .unwrap();
    let total = rows.iter().find(|r| r.key == "live.total_users").unwrap();
    assert_eq!(total.value, "42");
    assert_eq!(total.stat_type, "number");
    let sessions = rows.iter().find(|r| r.key == "live.live_sessions").unwrap();
    assert_eq!(sessions.stat_type, "json");

    // A restarted process whose refreshes never finish still serves the
    // persisted snapshot.
    let source = GatedSource::closed(0);
    let server = TestServer::with_source(test_config(&path, None), Arc::clone(&source)).await;
    let body = get_json(&client, &server.url("/api/v1/dashboard/stats?refresh=true")).await;
    assert_eq!(body["cached"], true);
    assert_eq!(body["generating"], false);
    assert_eq!(body["stats"]["total_users"], 42);
    assert!(body["cache_age_seconds"].is_u64());

    // Only the layer that was written comes back.
    let status = get_json(&client, &server.url("/api/v1/dashboard/refresh-status")).await;
    assert_eq!(status["layers"][0]["has_snapshot"], true);
    assert_eq!(status["layers"][1]["has_snapshot"], false);
    assert_eq!(status["layers"][2]["has_snapshot"], false);
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::{Path as UrlPath, Query};
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use streamdash_core::snapshot::{PanelSnapshot, StatsSnapshot, WatchStatistics};
use streamdash_core::test_helpers::sessions_payload;
use streamdash_iptv::PanelClientConfig;
use streamdash_plex::PlexClientConfig;
use streamdash_server::config::{AuthFileConfig, DatabaseConfig, RefreshConfig, ServerConfig};
use streamdash_server::db::Database;
use streamdash_server::refresh::{RefreshError, StatsSource};
use streamdash_server::state::AppState;
use streamdash_server::{build_app, build_state, build_state_with_source};

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start the app around a scripted snapshot source.
    pub async fn with_source<S: StatsSource + 'static>(config: ServerConfig, source: Arc<S>) -> Self {
        let source: Arc<dyn StatsSource> = source;
        let db = Database::open(&config.database.path).unwrap();
        let state = build_state_with_source(config, db, source).await.unwrap();
        Self::serve(state).await
    }

    /// Start the app exactly as `main` wires it, against whatever backends
    /// the config and database point at.
    pub async fn with_backends(config: ServerConfig) -> Self {
        let state = build_state(config).await.unwrap();
        Self::serve(state).await
    }

    async fn serve(state: AppState) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_app(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }
}

/// A database file that lives as long as the returned guard.
pub fn temp_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("streamdash.db");
    (dir, path)
}

/// Config with the scheduler off and every outbound timeout short.
pub fn test_config(db_path: &Path, directory_url: Option<String>) -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        auth: AuthFileConfig::default(),
        database: DatabaseConfig {
            path: db_path.to_string_lossy().into_owned(),
        },
        refresh: RefreshConfig {
            scheduler_enabled: false,
            ..RefreshConfig::default()
        },
        plex: PlexClientConfig {
            directory_url,
            directory_timeout_ms: 300,
            gateway_timeout_ms: 300,
            direct_timeout_ms: 300,
            library_timeout_ms: 300,
            history_timeout_ms: 300,
            history_attempts: 1,
            history_retry_delay_ms: 10,
            ..PlexClientConfig::default()
        },
        iptv: PanelClientConfig {
            timeout_ms: 300,
            ..PanelClientConfig::default()
        },
        ..ServerConfig::default()
    }
}

pub async fn seed_plex_server(
    db: &Database,
    name: &str,
    machine_id: &str,
    url: &str,
    gateway_url: Option<&str>,
) {
    let (name, machine_id, url) = (name.to_string(), machine_id.to_string(), url.to_string());
    let gateway_url = gateway_url.map(str::to_string);
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO plex_servers (name, machine_id, url, gateway_url, token) VALUES (?1, ?2, ?3, ?4, 'tok')",
            rusqlite::params![name, machine_id, url, gateway_url],
        )
    })
    .await
    .unwrap();
}

pub async fn seed_panel(db: &Database, name: &str, url: &str) {
    let (name, url) = (name.to_string(), url.to_string());
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO iptv_panels (name, url, username, password) VALUES (?1, ?2, 'user', 'pass')",
            rusqlite::params![name, url],
        )
    })
    .await
    .unwrap();
}

/// An in-process HTTP backend on an ephemeral port.
pub struct FakeBackend {
    pub addr: SocketAddr,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeBackend {
    pub async fn spawn(router: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        Self {
            addr,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// A Plex server with `sessions` movie sessions, one movie library of 12
/// items and a two-row watch history.
pub fn plex_router(sessions: usize) -> Router {
    Router::new()
        .route(
            "/status/sessions",
            get(move || async move { Json(sessions_payload(sessions)) }),
        )
        .route(
            "/library/sections",
            get(|| async {
                Json(json!({"MediaContainer": {"Directory": [
                    {"key": "1", "title": "Movies", "type": "movie"}
                ]}}))
            }),
        )
        .route(
            "/library/sections/{key}/all",
            get(|| async { Json(json!({"MediaContainer": {"totalSize": 12, "size": 0}})) }),
        )
        .route(
            "/accounts",
            get(|| async {
                Json(json!({"MediaContainer": {"Account": [
                    {"id": 1, "name": "alice"}, {"id": 2, "name": "bob"}
                ]}}))
            }),
        )
        .route(
            "/status/sessions/history/all",
            get(|| async {
                Json(json!({"MediaContainer": {"Metadata": [
                    {"type": "episode", "grandparentTitle": "Show X", "accountID": 1,
                     "Player": {"title": "Roku"}},
                    {"type": "movie", "title": "Heat", "year": 1995, "accountID": 2}
                ]}}))
            }),
        )
}

/// A Plex server with no sessions, a movie library of 12 and a show
/// library of 4 shows and 40 episodes whose season count always fails.
pub fn plex_router_with_broken_season_count() -> Router {
    Router::new()
        .route(
            "/status/sessions",
            get(|| async { Json(sessions_payload(0)) }),
        )
        .route(
            "/library/sections",
            get(|| async {
                Json(json!({"MediaContainer": {"Directory": [
                    {"key": "1", "title": "Movies", "type": "movie"},
                    {"key": "2", "title": "TV", "type": "show"}
                ]}}))
            }),
        )
        .route(
            "/library/sections/{key}/all",
            get(
                |UrlPath(key): UrlPath<String>, Query(query): Query<HashMap<String, String>>| async move {
                    let total = match (key.as_str(), query.get("type").map(String::as_str)) {
                        ("1", None) => 12,
                        ("2", None) => 4,
                        ("2", Some("4")) => 40,
                        _ => return Err(StatusCode::INTERNAL_SERVER_ERROR),
                    };
                    Ok(Json(json!({"MediaContainer": {"totalSize": total, "size": 0}})))
                },
            ),
        )
}

/// Answers every request with a 503.
pub fn failing_router() -> Router {
    Router::new().fallback(|| async { StatusCode::SERVICE_UNAVAILABLE })
}

/// Accepts connections and never answers in time.
pub fn hanging_router() -> Router {
    Router::new().fallback(|| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        StatusCode::OK
    })
}

/// Directory API. Machine `a` shares with alice and invites carol, `b`
/// shares with ALICE and bob and invites CAROL, `c` shares with dave.
pub fn directory_router() -> Router {
    Router::new().route(
        "/api/servers/{machine_id}/shared_servers",
        get(|UrlPath(machine_id): UrlPath<String>| async move {
            let shared: Value = match machine_id.as_str() {
                "a" => json!([
                    {"email": "alice@x.com", "acceptedAt": 1},
                    {"email": "carol@x.com", "invitedAt": 2}
                ]),
                "b" => json!([
                    {"email": "ALICE@x.com", "acceptedAt": 1},
                    {"username": "bob", "acceptedAt": 3},
                    {"email": "CAROL@x.com", "invitedAt": 2}
                ]),
                "c" => json!([{"email": "dave@x.com", "acceptedAt": 4}]),
                _ => json!([]),
            };
            Json(json!({"MediaContainer": {"SharedServer": shared}}))
        }),
    )
}

/// Xtream-style panel with 2 of 5 connections in use.
pub fn panel_router() -> Router {
    Router::new().route(
        "/player_api.php",
        get(|| async {
            Json(json!({"user_info": {"auth": 1, "status": "Active", "exp_date": "1767225600",
                                      "active_cons": "2", "max_connections": "5"}}))
        }),
    )
}

/// Snapshot source whose live refresh blocks until a permit is released.
pub struct GatedSource {
    gate: Semaphore,
    pub live_calls: AtomicUsize,
    failing: AtomicBool,
    total_users: u64,
}

impl GatedSource {
    pub fn closed(total_users: u64) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            live_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            total_users,
        })
    }

    pub fn open(total_users: u64) -> Arc<Self> {
        let source = Self::closed(total_users);
        source.gate.add_permits(Semaphore::MAX_PERMITS);
        source
    }

    /// Let `n` more live refreshes finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Make every later live refresh fail once it passes the gate.
    pub fn fail_from_now(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.live_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsSource for GatedSource {
    async fn run_full_refresh(&self) -> Result<StatsSnapshot, RefreshError> {
        let call = self.live_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate
            .acquire()
            .await
            .map_err(|e| RefreshError::Source(e.to_string()))?
            .forget();
        if self.failing.load(Ordering::SeqCst) {
            return Err(RefreshError::Source("plex_servers query failed".to_string()));
        }
        Ok(StatsSnapshot {
            total_users: self.total_users,
            total_live_sessions: call as u64,
            generated_at: Some(format!("run-{call}")),
            ..StatsSnapshot::default()
        })
    }

    async fn watch_statistics(&self) -> Result<WatchStatistics, RefreshError> {
        Ok(WatchStatistics::default())
    }

    async fn panel_snapshot(&self) -> Result<PanelSnapshot, RefreshError> {
        Ok(PanelSnapshot::default())
    }
}

pub async fn get_json(client: &reqwest::Client, url: &str) -> Value {
    let resp = client.get(url).send().await.unwrap();
    assert!(resp.status().is_success(), "GET {url} -> {}", resp.status());
    resp.json().await.unwrap()
}

/// Poll a layer endpoint until it serves a cached snapshot with no
/// refresh in flight (5s timeout).
pub async fn wait_for_cached(client: &reqwest::Client, url: &str) -> Value {
    for _ in 0..250 {
        let body = get_json(client, url).await;
        if body["cached"] == true && body["refreshing"] == false {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Timed out waiting for a cached snapshot at {url}");
}

/// Poll `check` until it holds (5s timeout).
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Timed out waiting for {what}");
}

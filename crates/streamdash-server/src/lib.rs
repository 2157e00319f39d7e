pub mod aggregator;
pub mod api;
pub mod auth;
pub mod cache_store;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod refresh;
pub mod resources;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use streamdash_iptv::{PanelClient, PanelError};
use streamdash_plex::{FetchError, ServerClient};

use aggregator::Aggregator;
use config::ServerConfig;
use db::{Database, DbError};
use refresh::StatsSource;
use resources::{CommandResourceMonitor, ResourceMonitor};
use state::AppState;

/// Conditions that stop the process before it starts serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database: {0}")]
    Database(#[from] DbError),
    #[error("plex client: {0}")]
    Plex(#[from] FetchError),
    #[error("panel client: {0}")]
    Panel(#[from] PanelError),
}

/// Build the Axum router around an existing state.
pub fn build_app(state: AppState) -> Router<()> {
    // API routes (behind bearer auth middleware)
    let api_routes = Router::new()
        .route("/dashboard/stats", get(api::get_stats))
        .route("/dashboard/watch-stats", get(api::get_watch_stats))
        .route("/dashboard/panels", get(api::get_panels))
        .route("/dashboard/refresh", post(api::post_refresh))
        .route("/dashboard/refresh-status", get(api::get_refresh_status))
        .fallback(api::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Open the database, wire the real backends and hydrate the cache.
pub async fn build_state(config: ServerConfig) -> Result<AppState, StartupError> {
    let db = Database::open(&config.database.path)?;
    let plex = ServerClient::new(config.plex.clone())?;
    let panels = PanelClient::new(config.iptv.clone())?;
    let monitor = config.resource_monitor.enabled.then(|| {
        Arc::new(CommandResourceMonitor::from_config(&config.resource_monitor))
            as Arc<dyn ResourceMonitor>
    });
    let source = Arc::new(Aggregator::new(db.clone(), plex, panels, monitor));
    build_state_with_source(config, db, source).await
}

/// Wire state around any [`StatsSource`] and hydrate every layer from the
/// durable tier before returning.
pub async fn build_state_with_source(
    config: ServerConfig,
    db: Database,
    source: Arc<dyn StatsSource>,
) -> Result<AppState, StartupError> {
    let state = AppState::new(config, db, source);
    let restored = state.cache.hydrate().await?;
    tracing::info!(layers = restored, "Cache hydrated");
    Ok(state)
}

/// Middleware wrapper that injects AuthConfig into request extensions for the
/// bearer auth middleware.
async fn bearer_auth_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    request.extensions_mut().insert(state.auth.clone());
    auth::bearer_auth_middleware(request.headers().clone(), request, next).await
}

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use streamdash_core::snapshot::{PanelSnapshot, StatsSnapshot, WatchStatistics};
use streamdash_core::time::age_seconds;

use crate::cache_store::{Layer, LayerSnapshot};
use crate::error::AppError;
use crate::refresh::{LayerStatus, TriggerOutcome};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    pub refresh: Option<String>,
}

impl RefreshQuery {
    fn forced(&self) -> bool {
        self.refresh
            .as_deref()
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }
}

/// Response body shared by every layer endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse<T> {
    pub success: bool,
    pub stats: Arc<T>,
    pub cached: bool,
    pub cache_age_seconds: Option<u64>,
    pub refreshing: bool,
    pub generating: bool,
}

/// Serve the cached snapshot for `T`'s layer, kicking off a refresh when
/// the policy calls for one. Never waits for that refresh.
async fn serve_layer<T: LayerSnapshot>(state: &AppState, force: bool) -> StatsResponse<T> {
    let outcome = state.coordinator.trigger(T::LAYER, force).await;
    if force {
        tracing::debug!(layer = %T::LAYER, ?outcome, "Forced refresh requested");
    }
    let slot = state.cache.get::<T>().await;
    let refreshing = state.coordinator.is_refreshing(T::LAYER);
    match slot.snapshot {
        Some(stats) => StatsResponse {
            success: true,
            stats,
            cached: true,
            cache_age_seconds: slot.stored_at.map(|at| age_seconds(at, Utc::now())),
            refreshing,
            generating: false,
        },
        None => StatsResponse {
            success: true,
            stats: Arc::new(T::default()),
            cached: false,
            cache_age_seconds: None,
            refreshing,
            generating: true,
        },
    }
}

/// GET /api/v1/dashboard/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Json<StatsResponse<StatsSnapshot>> {
    Json(serve_layer(&state, query.forced()).await)
}

/// GET /api/v1/dashboard/watch-stats
pub async fn get_watch_stats(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Json<StatsResponse<WatchStatistics>> {
    Json(serve_layer(&state, query.forced()).await)
}

/// GET /api/v1/dashboard/panels
pub async fn get_panels(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Json<StatsResponse<PanelSnapshot>> {
    Json(serve_layer(&state, query.forced()).await)
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub layers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LayerTrigger {
    pub layer: Layer,
    pub outcome: TriggerOutcome,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub results: Vec<LayerTrigger>,
}

/// Parse and dedupe requested layer names, keeping request order.
pub fn parse_layers(names: &[String]) -> Result<Vec<Layer>, AppError> {
    if names.is_empty() {
        return Err(AppError::BadRequest("layers must not be empty".to_string()));
    }
    let mut layers = Vec::with_capacity(names.len());
    for name in names {
        let layer = name.parse::<Layer>().map_err(AppError::BadRequest)?;
        if !layers.contains(&layer) {
            layers.push(layer);
        }
    }
    Ok(layers)
}

/// POST /api/v1/dashboard/refresh: force refreshes for the named layers.
pub async fn post_refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RefreshResponse>), AppError> {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let layers = parse_layers(&body.layers)?;

    let mut results = Vec::with_capacity(layers.len());
    for layer in layers {
        let outcome = state.coordinator.trigger(layer, true).await;
        tracing::info!(layer = %layer, ?outcome, "Refresh requested via API");
        results.push(LayerTrigger { layer, outcome });
    }
    Ok((StatusCode::ACCEPTED, Json(RefreshResponse { results })))
}

#[derive(Debug, Serialize)]
pub struct RefreshStatusResponse {
    pub layers: Vec<LayerStatus>,
}

/// GET /api/v1/dashboard/refresh-status
pub async fn get_refresh_status(State(state): State<AppState>) -> Json<RefreshStatusResponse> {
    Json(RefreshStatusResponse {
        layers: state.coordinator.statuses().await,
    })
}

/// Fallback for unknown `/api/v1` routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("no such endpoint".to_string())
}

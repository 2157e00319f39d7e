use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::cache_store::Layer;
use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub layers: Vec<LayerHealth>,
}

#[derive(Serialize)]
pub struct LayerHealth {
    pub layer: Layer,
    pub has_snapshot: bool,
    pub refreshing: bool,
    pub cache_age_seconds: Option<u64>,
}

/// Process is up; reports what each cache layer holds.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let layers = state
        .coordinator
        .statuses()
        .await
        .into_iter()
        .map(|s| LayerHealth {
            layer: s.layer,
            has_snapshot: s.has_snapshot,
            refreshing: s.refreshing,
            cache_age_seconds: s.cache_age_seconds,
        })
        .collect();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        layers,
    })
}

/// Readiness check: the database answers.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "not ready: database unavailable")
        },
    }
}

//! Health and version probes

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// Ready once the audit store answers a query.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.governor.audit().store().clone();
    match tokio::task::spawn_blocking(move || store.count()).await {
        Ok(Ok(events)) => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "audit_events": events })),
        ),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "audit store not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "message": err.to_string() })),
            )
        }
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "message": err.to_string() })),
        ),
    }
}

pub async fn version(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.governor.config();
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "mode": config.mode,
        "enforcement_active": config.enforcement_active(),
        "policies": state.governor.policies().len(),
    }))
}

//! Liveness and readiness checks

use crate::{models::ApiResponse, AppState};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::warn;

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": state.version,
    })))
}

pub async fn handle_readiness(State(state): State<AppState>) -> impl IntoResponse {
    let reclaimer = state.reclaimer.as_ref().map(|r| r.state());

    if let Some(db_manager) = &state.db_manager {
        if let Err(e) = db_manager.health_check().await {
            warn!("Readiness check failed: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Ledger database unavailable".to_string())),
            );
        }
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "status": "ready",
            "timestamp": chrono::Utc::now().timestamp(),
            "reclaimer": reclaimer,
        }))),
    )
}

//! Route table

use crate::{models::ApiResponse, utils::format_bytes, AppState};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use super::{files, health};

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_root).post(files::upload_file))
        .route("/health", get(health::handle_health).put(files::upload_raw_at_route))
        .route("/ready", get(health::handle_readiness).put(files::upload_raw_at_route))
        .route("/:id", get(files::download_file).put(files::upload_raw))
        .route("/:id/info", get(files::file_info))
}

async fn handle_root(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.file_manager.config();

    Json(ApiResponse::success(serde_json::json!({
        "app": state.app_name,
        "version": state.version,
        "max_file_size": config.max_file_size,
        "max_file_size_human": format_bytes(config.max_file_size),
        "file_expiry_hours": config.ttl.num_hours(),
        "endpoints": {
            "upload": "POST / (multipart field \"file\")",
            "upload_raw": "PUT /{filename}",
            "download": "GET /{id}",
            "info": "GET /{id}/info",
            "health": "/health"
        }
    })))
}

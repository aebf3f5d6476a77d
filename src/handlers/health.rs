use axum::{Json, extract::State};
use std::sync::Arc;

use crate::models::HealthResponse;
use crate::state::AppState;

// Health check on the chat path; callers use it to detect a deployed backend
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        msg: "chat function is deployed",
        keys_available: state.dispatcher.pool_size().await,
        api_url: state.dispatcher.upstream_url().to_string(),
        timestamp: state.clock.now_ms() as i64,
    })
}

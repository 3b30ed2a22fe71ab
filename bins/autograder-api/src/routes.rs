use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

/// Multipart framing and JSON escaping on top of the raw program.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn routes(state: Arc<AppState>) -> Router {
    let body_limit = state.manager.settings().max_source_bytes + BODY_OVERHEAD_BYTES;

    Router::new()
        .route("/text", post(handlers::submit_text))
        .route("/file", post(handlers::submit_file))
        .route("/job", get(handlers::get_job))
        .route("/stats", get(handlers::get_stats))
        .route("/status", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// HTTP route handlers for the Autograder API

use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use autograder_common::types::{JobId, JobSnapshot, ManagerStats, Submission};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TextSubmission {
    pub problem: String,
    pub language: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub id: Option<String>,
}

/// POST /text - Submit a program as JSON
pub async fn submit_text(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TextSubmission>, JsonRejection>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let submission = Submission::new(payload.problem, payload.language, payload.text);
    let snapshot = state.manager.admit(submission).await?;
    Ok(Json(snapshot))
}

/// POST /file - Submit a program as a multipart upload
///
/// Fields: `problem`, `language` and `file` (the program).
pub async fn submit_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JobSnapshot>, ApiError> {
    let mut problem = String::new();
    let mut language = String::new();
    let mut source = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "problem" => {
                problem = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
            }
            "language" => {
                language = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
            }
            "file" => {
                source = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?
                    .to_vec();
            }
            other => warn!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let submission = Submission::new(problem, language, source);
    let snapshot = state.manager.admit(submission).await?;
    Ok(Json(snapshot))
}

/// GET /job?id=<n> - Current snapshot of a job
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let raw = match query.id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(ApiError::bad_request("No ID provided.")),
    };

    let id: JobId = raw
        .parse()
        .map_err(|_| ApiError::bad_request("ID must be an integer."))?;

    state
        .manager
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::bad_request(format!("Job {id} does not exist.")))
}

/// GET /stats - Job counts by status
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ManagerStats> {
    Json(state.manager.stats())
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

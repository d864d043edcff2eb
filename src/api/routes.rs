//! Request handlers.
//!
//! Reads are served from the projection only, never from the broker.
//! Submission goes to the broker only, never to the projection.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::error::Error;
use crate::model::{NewTask, Submission, Task, TaskId};

/// Body of `POST /tasks`. Both fields are required; they are optional here
/// so that a missing field is reported as a 400 with a useful message.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(rename = "type", default)]
    pub task_type: Option<String>,
    #[serde(alias = "data", default)]
    pub payload: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResponse {
    pub cleared_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub broker_connected: bool,
    pub cached_count: usize,
}

pub async fn submit_task(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    let Json(req) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let new = NewTask::new(
        req.task_type.unwrap_or_default(),
        req.payload.unwrap_or_default(),
    )?;
    let submission = state.publisher.submit(new).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.projection.list())
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    TaskId::parse(id.clone())
        .and_then(|id| state.projection.get(&id))
        .map(Json)
        .ok_or_else(|| Error::NotFound(id).into())
}

/// Clear the cached view. Broker-resident messages are untouched, so tasks
/// still in flight reappear when their next event is consumed.
pub async fn clear_tasks(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared_count = state.projection.clear();
    tracing::info!(cleared_count, "projection cleared");
    Json(ClearResponse { cleared_count })
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let broker_connected = state.connection.is_connected();
    let body = HealthResponse {
        status: if broker_connected {
            "healthy"
        } else {
            "unhealthy"
        }
        .to_string(),
        broker_connected,
        cached_count: state.projection.len(),
    };
    let status = if broker_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use http::{header, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::Server;
use crate::{metrics, store::Execution, workflow::Event, Error};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// Maps engine errors onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidState(_) | Error::AlreadyActive { .. } => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn export_metrics() -> ApiResult<Response> {
    let body = metrics::gather_metrics()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub execution_ids: Vec<Uuid>,
}

pub async fn dispatch_event(
    State(server): State<Arc<Server>>,
    Json(event): Json<Event>,
) -> ApiResult<(StatusCode, Json<DispatchResponse>)> {
    info!(
        "Received {} event for subject {} (tenant {})",
        event.kind, event.subject_id, event.tenant_id
    );

    let execution_ids = server.engine.dispatch(&event).await?;

    Ok((StatusCode::ACCEPTED, Json(DispatchResponse { execution_ids })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_executions(
    State(server): State<Arc<Server>>,
    Path(workflow_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Execution>>> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let executions = server.engine.list_executions(workflow_id, limit, offset).await?;
    Ok(Json(executions))
}

pub async fn get_execution(
    State(server): State<Arc<Server>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    server
        .engine
        .get_execution(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError(Error::NotFound(format!("execution {}", id))))
}

pub async fn cancel_execution(
    State(server): State<Arc<Server>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    let execution = server.engine.cancel(id).await?;
    Ok(Json(execution))
}

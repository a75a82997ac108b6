//! Axum route handlers for the Generation API.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::executor;
use crate::generation::store::{self, DocumentType, RequestDetail, RequestView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub context: Value,
    pub document_types: Vec<DocumentType>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// POST /api/v1/generation
///
/// Creates a request with its full step plan and returns it without running
/// anything. Drive it forward with the advance endpoint.
pub async fn handle_start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<RequestView>), AppError> {
    let view = store::start(&state.db, request.context, &request.document_types).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /api/v1/generation/:id/advance
///
/// Runs exactly one step: the first pending or failed one in ordinal order.
/// Safe to call on a finished request (it just returns the terminal state);
/// after a failure it retries the failed step in place, never its successor.
pub async fn handle_advance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestView>, AppError> {
    let view = executor::advance_step(&state.db, &state.agent, &state.artifacts, id).await?;
    Ok(Json(view))
}

/// POST /api/v1/generation/generate
///
/// Synchronous convenience: start + advance until done or first failure.
/// The response always carries the step list; callers must check `status`.
pub async fn handle_generate(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<RequestView>, AppError> {
    let view = executor::generate(
        &state.db,
        &state.agent,
        &state.artifacts,
        request.context,
        &request.document_types,
    )
    .await?;
    Ok(Json(view))
}

/// GET /api/v1/generation
pub async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<RequestView>>, AppError> {
    let views = store::list_requests(
        &state.db,
        params.limit.unwrap_or(50),
        params.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(views))
}

/// GET /api/v1/generation/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestDetail>, AppError> {
    Ok(Json(store::get_request(&state.db, id).await?))
}

/// GET /api/v1/generation/:id/artifacts/:artifact_type/:filename
///
/// Streams the artifact bytes with the recorded content type.
pub async fn handle_get_artifact(
    State(state): State<AppState>,
    Path((id, artifact_type, filename)): Path<(Uuid, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let (row, bytes) = state
        .artifacts
        .get(&state.db, id, &artifact_type, &filename)
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, row.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", row.filename),
            ),
        ],
        bytes,
    ))
}

/// DELETE /api/v1/generation/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    store::delete_request(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Axum route handlers for the Queue API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::queue::QueueItemRow;
use crate::models::source::ScrapingSchedule;
use crate::queue::scoring;
use crate::queue::store::{self, ListFilters, NewQueueItem};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueueListResponse {
    pub items: Vec<QueueItemRow>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    pub reason: Option<String>,
}

/// POST /api/v1/queue
///
/// Submits a work item. Rejects malformed payloads (400) and duplicates of
/// an already-active (type, url) pair (409).
pub async fn handle_submit(
    State(state): State<AppState>,
    Json(request): Json<NewQueueItem>,
) -> Result<(StatusCode, Json<QueueItemRow>), AppError> {
    let row = store::enqueue(&state.db, request).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/queue
///
/// Paginated listing, filterable by status/type/company, newest first.
/// Clients must check each item's status field; a response without an
/// error does not mean the work succeeded.
pub async fn handle_list(
    State(state): State<AppState>,
    Query(filters): Query<ListFilters>,
) -> Result<Json<QueueListResponse>, AppError> {
    let limit = filters.limit.unwrap_or(50).clamp(1, 200);
    let offset = filters.offset.unwrap_or(0).max(0);
    let (items, total) = store::list_items(&state.db, &filters).await?;
    Ok(Json(QueueListResponse {
        items,
        total,
        limit,
        offset,
    }))
}

/// GET /api/v1/queue/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueItemRow>, AppError> {
    Ok(Json(store::get_item(&state.db, id).await?))
}

/// POST /api/v1/queue/:id/retry
///
/// Manual retry of a failed item. Resets the retry budget.
pub async fn handle_retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueItemRow>, AppError> {
    Ok(Json(store::retry(&state.db, id).await?))
}

/// POST /api/v1/queue/:id/skip
pub async fn handle_skip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SkipRequest>,
) -> Result<Json<QueueItemRow>, AppError> {
    let reason = request
        .reason
        .unwrap_or_else(|| "Skipped by operator".to_string());
    Ok(Json(store::skip(&state.db, id, reason).await?))
}

/// GET /api/v1/sources
///
/// All non-disabled sources, freshly scored, in dispatch order: higher
/// score first, ties broken by the most recent successful scrape.
pub async fn handle_list_sources(
    State(state): State<AppState>,
) -> Result<Json<SourceListResponse>, AppError> {
    let sources = scoring::rank_sources(&state.db, state.scorer.as_ref()).await?;
    Ok(Json(SourceListResponse {
        total: sources.len(),
        sources,
    }))
}

#[derive(Debug, Serialize)]
pub struct SourceListResponse {
    pub sources: Vec<scoring::RankedSource>,
    pub total: usize,
}

/// POST /api/v1/sources/:id/rescore
///
/// Re-runs the scorer for one source after its config or company linkage
/// changed; updates the source tier and the priority of its active items.
pub async fn handle_rescore_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RescoreResponse>, AppError> {
    let source = scoring::rescore_source(&state.db, state.scorer.as_ref(), id).await?;
    Ok(Json(RescoreResponse {
        source_id: source.id,
        tier: source.tier.clone(),
        schedule: source.schedule(),
    }))
}

#[derive(Debug, Serialize)]
pub struct RescoreResponse {
    pub source_id: Uuid,
    pub tier: String,
    pub schedule: ScrapingSchedule,
}

/// DELETE /api/v1/queue/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    store::delete(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

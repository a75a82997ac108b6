//! Generation request store: requests and their fixed, ordered step lists.
//!
//! The step list is planned once, at start(): every pipeline step gets a row
//! in ordinal order, pre-marked skipped when the caller did not request the
//! document it produces. After that the rows only move through the step
//! state machine; the set never grows or shrinks, which is what makes a
//! half-finished request resumable and auditable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::generation::{
    derive_request_status, ArtifactRow, GenerationRequestRow, GenerationStepRow, RequestStatus,
    StepName, StepStatus,
};

// ────────────────────────────────────────────────────────────────────────────
// Step planning
// ────────────────────────────────────────────────────────────────────────────

/// Document kinds a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Resume,
    CoverLetter,
}

/// Plans the step list for the requested document types. Pure; the whole
/// skip/pending layout is decided here and unit-tested without a DB.
pub fn plan_steps(document_types: &[DocumentType]) -> Vec<(StepName, StepStatus)> {
    let wants_resume = document_types.contains(&DocumentType::Resume);
    let wants_cover = document_types.contains(&DocumentType::CoverLetter);

    StepName::ALL
        .iter()
        .map(|&name| {
            let status = match name {
                StepName::CollectData => StepStatus::Pending,
                StepName::GenerateResume if wants_resume => StepStatus::Pending,
                StepName::GenerateResume => StepStatus::Skipped,
                StepName::GenerateCoverLetter if wants_cover => StepStatus::Pending,
                StepName::GenerateCoverLetter => StepStatus::Skipped,
                StepName::RenderPdf => StepStatus::Pending,
            };
            (name, status)
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Views
// ────────────────────────────────────────────────────────────────────────────

/// State of one request: explicit status plus the full step list. Clients
/// must check `status`; the absence of an error field means nothing.
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub steps: Vec<GenerationStepRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestDetail {
    pub request: GenerationRequestRow,
    pub status: RequestStatus,
    pub steps: Vec<GenerationStepRow>,
    pub artifacts: Vec<ArtifactRow>,
}

pub fn view_of(request_id: Uuid, steps: Vec<GenerationStepRow>) -> RequestView {
    let statuses: Vec<StepStatus> =
        steps.iter().filter_map(|s| s.status_enum()).collect();
    RequestView {
        request_id,
        status: derive_request_status(&statuses),
        steps,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store operations
// ────────────────────────────────────────────────────────────────────────────

/// Creates a request and its fixed step list in one transaction.
pub async fn start(
    pool: &PgPool,
    context: Value,
    document_types: &[DocumentType],
) -> Result<RequestView, AppError> {
    if document_types.is_empty() {
        return Err(AppError::Validation(
            "document_types must name at least one document".to_string(),
        ));
    }

    let request_id = Uuid::new_v4();
    let plan = plan_steps(document_types);

    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO generation_requests (id, context) VALUES ($1, $2)")
        .bind(request_id)
        .bind(&context)
        .execute(&mut *tx)
        .await?;

    for (name, status) in &plan {
        sqlx::query(
            r#"
            INSERT INTO generation_steps (id, request_id, ordinal, name, status, attempt)
            VALUES ($1, $2, $3, $4, $5, 0)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request_id)
        .bind(name.ordinal())
        .bind(name.as_str())
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        "Started generation request {request_id} ({} steps, {} pre-skipped)",
        plan.len(),
        plan.iter()
            .filter(|(_, s)| *s == StepStatus::Skipped)
            .count()
    );

    let steps = fetch_steps(pool, request_id).await?;
    Ok(view_of(request_id, steps))
}

pub async fn get_request_row(
    pool: &PgPool,
    request_id: Uuid,
) -> Result<GenerationRequestRow, AppError> {
    sqlx::query_as("SELECT * FROM generation_requests WHERE id = $1")
        .bind(request_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Generation request {request_id} not found")))
}

/// All steps of a request in ordinal order. NotFound when the request
/// itself does not exist.
pub async fn fetch_steps(
    pool: &PgPool,
    request_id: Uuid,
) -> Result<Vec<GenerationStepRow>, AppError> {
    let steps: Vec<GenerationStepRow> = sqlx::query_as(
        "SELECT * FROM generation_steps WHERE request_id = $1 ORDER BY ordinal ASC",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    if steps.is_empty() {
        // A request always owns its full step list; no rows means no request.
        get_request_row(pool, request_id).await?;
    }
    Ok(steps)
}

/// Full detail: request + steps + artifacts, one round trip each.
pub async fn get_request(pool: &PgPool, request_id: Uuid) -> Result<RequestDetail, AppError> {
    let request = get_request_row(pool, request_id).await?;
    let steps = fetch_steps(pool, request_id).await?;
    let artifacts = crate::artifacts::list_for_request(pool, request_id).await?;

    let statuses: Vec<StepStatus> = steps.iter().filter_map(|s| s.status_enum()).collect();
    Ok(RequestDetail {
        request,
        status: derive_request_status(&statuses),
        steps,
        artifacts,
    })
}

/// Request history, newest first.
pub async fn list_requests(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<RequestView>, AppError> {
    let requests: Vec<GenerationRequestRow> = sqlx::query_as(
        "SELECT * FROM generation_requests ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit.clamp(1, 200))
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    let mut views = Vec::with_capacity(requests.len());
    for request in requests {
        let steps = fetch_steps(pool, request.id).await?;
        views.push(view_of(request.id, steps));
    }
    Ok(views)
}

/// Explicit cleanup. Steps and artifact records cascade with the request;
/// artifact bytes age out via bucket lifecycle rules.
pub async fn delete_request(pool: &PgPool, request_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM generation_requests WHERE id = $1")
        .bind(request_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Generation request {request_id} not found"
        )));
    }
    info!("Deleted generation request {request_id}");
    Ok(())
}

/// Requeues steps stuck in_progress past the staleness threshold, crash
/// recovery; the interrupted attempt stays counted on the row.
pub async fn recover_stale_steps(pool: &PgPool, threshold_secs: i64) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE generation_steps
        SET status = 'pending', started_at = NULL
        WHERE status = 'in_progress'
          AND started_at < now() - ($1 * interval '1 second')
        "#,
    )
    .bind(threshold_secs)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_resume_only_skips_cover_letter() {
        let plan = plan_steps(&[DocumentType::Resume]);
        assert_eq!(
            plan,
            vec![
                (StepName::CollectData, StepStatus::Pending),
                (StepName::GenerateResume, StepStatus::Pending),
                (StepName::GenerateCoverLetter, StepStatus::Skipped),
                (StepName::RenderPdf, StepStatus::Pending),
            ]
        );
    }

    #[test]
    fn test_plan_both_documents_skips_nothing() {
        let plan = plan_steps(&[DocumentType::Resume, DocumentType::CoverLetter]);
        assert!(plan.iter().all(|(_, s)| *s == StepStatus::Pending));
    }

    #[test]
    fn test_plan_cover_letter_only() {
        let plan = plan_steps(&[DocumentType::CoverLetter]);
        assert_eq!(plan[1], (StepName::GenerateResume, StepStatus::Skipped));
        assert_eq!(
            plan[2],
            (StepName::GenerateCoverLetter, StepStatus::Pending)
        );
    }

    #[test]
    fn test_plan_preserves_ordinal_order() {
        let plan = plan_steps(&[DocumentType::Resume]);
        let names: Vec<StepName> = plan.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.as_slice(), StepName::ALL);
    }
}

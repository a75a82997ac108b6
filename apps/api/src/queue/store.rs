//! Queue store: persistent work items with status/retry bookkeeping.
//!
//! All lifecycle mutations are single conditional UPDATEs keyed on the
//! current status, so the row transitions exactly once even with multiple
//! worker processes claiming concurrently. No in-process locks; the table
//! is the only concurrency primitive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::queue::{ItemSource, QueueItemRow, QueueItemStatus, QueueItemType};
use crate::models::source::Tier;
use crate::queue::stoplist::StopList;

/// Default attempt budget for newly-enqueued items.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

// ────────────────────────────────────────────────────────────────────────────
// Submission
// ────────────────────────────────────────────────────────────────────────────

/// Payload for enqueueing a work item.
#[derive(Debug, Clone, Deserialize)]
pub struct NewQueueItem {
    pub item_type: String,
    pub url: String,
    pub company_name: Option<String>,
    pub company_id: Option<Uuid>,
    pub source: String,
    pub submitted_by: Option<String>,
    pub max_retries: Option<i32>,
    // scrape_source items only
    pub source_id: Option<Uuid>,
    pub source_type: Option<String>,
    pub source_config: Option<Value>,
    pub tier: Option<String>,
}

/// Validates required fields per item type and returns the parsed type and
/// source. Pure, unit-tested without a DB.
pub fn validate_new_item(item: &NewQueueItem) -> Result<(QueueItemType, ItemSource), AppError> {
    let item_type = QueueItemType::parse(&item.item_type)
        .ok_or_else(|| AppError::Validation(format!("Unknown item type '{}'", item.item_type)))?;

    let url = Url::parse(&item.url)
        .map_err(|e| AppError::Validation(format!("Malformed url '{}': {e}", item.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "url must be http(s), got '{}'",
            url.scheme()
        )));
    }

    let source = ItemSource::parse(&item.source).ok_or_else(|| {
        AppError::Validation(format!("Unknown item source '{}'", item.source))
    })?;

    match item_type {
        QueueItemType::Company => {
            if item.company_name.as_deref().map_or(true, str::is_empty) {
                return Err(AppError::Validation(
                    "company items require company_name".to_string(),
                ));
            }
        }
        QueueItemType::ScrapeSource => {
            if item.source_id.is_none() {
                return Err(AppError::Validation(
                    "scrape_source items require source_id".to_string(),
                ));
            }
            if item.source_type.as_deref().map_or(true, str::is_empty) {
                return Err(AppError::Validation(
                    "scrape_source items require source_type".to_string(),
                ));
            }
        }
        _ => {}
    }

    if let Some(max) = item.max_retries {
        if max < 0 {
            return Err(AppError::Validation(
                "max_retries must be non-negative".to_string(),
            ));
        }
    }
    if let Some(tier) = &item.tier {
        if Tier::parse(tier).is_none() {
            return Err(AppError::Validation(format!("Unknown tier '{tier}'")));
        }
    }

    Ok((item_type, source))
}

/// Inserts a new queue item as pending.
///
/// Dedup: at most one active (pending/processing) item per (type, url). The
/// pre-check gives a clean DuplicateError; the partial unique index backs it
/// up under races, surfaced as the same error.
pub async fn enqueue(pool: &PgPool, item: NewQueueItem) -> Result<QueueItemRow, AppError> {
    let (_, source) = validate_new_item(&item)?;

    let duplicate: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM queue_items
        WHERE item_type = $1 AND url = $2 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(&item.item_type)
    .bind(&item.url)
    .fetch_optional(pool)
    .await?;

    if duplicate.is_some() {
        return Err(AppError::Duplicate(format!(
            "An active {} item already exists for {}",
            item.item_type, item.url
        )));
    }

    let priority = item
        .tier
        .as_deref()
        .and_then(Tier::parse)
        .map(|t| t.priority())
        .unwrap_or(0);

    let row: QueueItemRow = sqlx::query_as(
        r#"
        INSERT INTO queue_items
            (id, item_type, status, url, company_name, company_id, source,
             submitted_by, retry_count, max_retries, priority,
             source_id, source_type, source_config, tier)
        VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, 0, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&item.item_type)
    .bind(&item.url)
    .bind(&item.company_name)
    .bind(item.company_id)
    // Canonical spelling, not the caller's raw string.
    .bind(source.as_str())
    .bind(&item.submitted_by)
    .bind(item.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
    .bind(priority)
    .bind(item.source_id)
    .bind(&item.source_type)
    .bind(&item.source_config)
    .bind(&item.tier)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Duplicate(format!(
            "An active {} item already exists for {}",
            item.item_type, item.url
        )),
        _ => AppError::Database(e),
    })?;

    info!("Enqueued {} item {} ({})", row.item_type, row.id, row.url);
    Ok(row)
}

// ────────────────────────────────────────────────────────────────────────────
// Claiming
// ────────────────────────────────────────────────────────────────────────────

/// Atomically claims the next eligible pending item, or returns None.
///
/// Ordering: priority DESC (tier), then created_at ASC. Stop-listed items
/// are recorded skipped (pending to skipped, never handed out) and the
/// search continues. Both the skip and the claim are conditional on
/// `status = 'pending'`, so two concurrent callers can never act on the
/// same item twice: the loser's UPDATE touches zero rows and it loops.
pub async fn dequeue_next(
    pool: &PgPool,
    stop_list: &StopList,
) -> Result<Option<QueueItemRow>, AppError> {
    loop {
        let candidate: Option<QueueItemRow> = sqlx::query_as(
            r#"
            SELECT * FROM queue_items
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(pool)
        .await?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        if let Some(block) =
            stop_list.evaluate(&candidate.url, candidate.company_name.as_deref(), None)
        {
            let skipped = sqlx::query(
                r#"
                UPDATE queue_items
                SET status = 'skipped', result_message = $1,
                    completed_at = now(), updated_at = now()
                WHERE id = $2 AND status = 'pending'
                "#,
            )
            .bind(format!("Skipped by stop list: {}", block.reason))
            .bind(candidate.id)
            .execute(pool)
            .await?;

            if skipped.rows_affected() > 0 {
                info!(
                    "Stop-listed item {} skipped ({})",
                    candidate.id, block.reason
                );
            }
            // Either we skipped it or someone else transitioned it; look again.
            continue;
        }

        let claimed: Option<QueueItemRow> = sqlx::query_as(
            r#"
            UPDATE queue_items
            SET status = 'processing', processed_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(candidate.id)
        .fetch_optional(pool)
        .await?;

        match claimed {
            Some(row) => {
                debug!("Claimed item {} ({})", row.id, row.item_type);
                return Ok(Some(row));
            }
            // Lost the race for this candidate; try the next one.
            None => continue,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outcomes
// ────────────────────────────────────────────────────────────────────────────

/// Whether a handler failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network/timeout, auto-retried until the attempt budget runs out.
    Transient,
    /// Validation/permanent, fails immediately regardless of retry_count.
    Terminal,
}

/// Result of one processing attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success { message: String },
    Failed { details: String, class: FailureClass },
    Skipped { reason: String },
}

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Requeue as pending with retry_count incremented.
    Requeue,
    /// Terminal failure.
    Fail,
}

/// Pure retry policy: a transient failure requeues while the incremented
/// retry_count stays below max_retries; terminal failures never requeue.
pub fn failure_disposition(
    retry_count: i32,
    max_retries: i32,
    class: FailureClass,
) -> FailureDisposition {
    match class {
        FailureClass::Terminal => FailureDisposition::Fail,
        FailureClass::Transient => {
            if retry_count + 1 < max_retries {
                FailureDisposition::Requeue
            } else {
                FailureDisposition::Fail
            }
        }
    }
}

/// Records the outcome of a processing attempt. Only legal from processing;
/// a stale or double write touches zero rows and surfaces as Conflict.
pub async fn record_outcome(
    pool: &PgPool,
    id: Uuid,
    outcome: Outcome,
) -> Result<QueueItemRow, AppError> {
    let current = get_item(pool, id).await?;
    let status = current
        .status_enum()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Corrupt status on item {id}")))?;
    if status != QueueItemStatus::Processing {
        return Err(AppError::Conflict(format!(
            "Item {id} is {}, not processing",
            current.status
        )));
    }

    let updated: Option<QueueItemRow> = match outcome {
        Outcome::Success { message } => {
            sqlx::query_as(
                r#"
                UPDATE queue_items
                SET status = 'success', result_message = $1,
                    completed_at = now(), updated_at = now()
                WHERE id = $2 AND status = 'processing'
                RETURNING *
                "#,
            )
            .bind(message)
            .bind(id)
            .fetch_optional(pool)
            .await?
        }
        Outcome::Skipped { reason } => {
            sqlx::query_as(
                r#"
                UPDATE queue_items
                SET status = 'skipped', result_message = $1,
                    completed_at = now(), updated_at = now()
                WHERE id = $2 AND status = 'processing'
                RETURNING *
                "#,
            )
            .bind(reason)
            .bind(id)
            .fetch_optional(pool)
            .await?
        }
        Outcome::Failed { details, class } => {
            match failure_disposition(current.retry_count, current.max_retries, class) {
                FailureDisposition::Requeue => {
                    warn!(
                        "Item {id} attempt {} failed, requeueing: {details}",
                        current.retry_count + 1
                    );
                    sqlx::query_as(
                        r#"
                        UPDATE queue_items
                        SET status = 'pending', retry_count = retry_count + 1,
                            error_details = $1, updated_at = now()
                        WHERE id = $2 AND status = 'processing'
                        RETURNING *
                        "#,
                    )
                    .bind(details)
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                }
                FailureDisposition::Fail => {
                    warn!("Item {id} failed terminally: {details}");
                    sqlx::query_as(
                        r#"
                        UPDATE queue_items
                        SET status = 'failed',
                            retry_count = LEAST(retry_count + 1, max_retries),
                            error_details = $1,
                            completed_at = now(), updated_at = now()
                        WHERE id = $2 AND status = 'processing'
                        RETURNING *
                        "#,
                    )
                    .bind(details)
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                }
            }
        }
    };

    updated.ok_or_else(|| {
        AppError::Conflict(format!("Item {id} was transitioned by another worker"))
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Manual actions
// ────────────────────────────────────────────────────────────────────────────

/// Manual retry: only from failed. Resets retry_count to 0; a deliberate
/// operator restart gets the full attempt budget back (automatic retries
/// increment instead).
pub async fn retry(pool: &PgPool, id: Uuid) -> Result<QueueItemRow, AppError> {
    let updated: Option<QueueItemRow> = sqlx::query_as(
        r#"
        UPDATE queue_items
        SET status = 'pending', retry_count = 0, error_details = NULL,
            result_message = NULL, processed_at = NULL, completed_at = NULL,
            updated_at = now()
        WHERE id = $1 AND status = 'failed'
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(row) => {
            info!("Item {id} manually retried");
            Ok(row)
        }
        None => {
            let current = get_item(pool, id).await?;
            Err(AppError::Conflict(format!(
                "Only failed items can be retried; item {id} is {}",
                current.status
            )))
        }
    }
}

/// Manual skip: aborts an item that has not finished. Processing items are
/// excluded; in-flight work is never aborted mid-attempt.
pub async fn skip(pool: &PgPool, id: Uuid, reason: String) -> Result<QueueItemRow, AppError> {
    let current = get_item(pool, id).await?;
    let legal = current.status_enum().map_or(false, |s| {
        s != QueueItemStatus::Processing && s.can_transition_to(QueueItemStatus::Skipped)
    });
    if !legal {
        let detail = if current.status_enum().map_or(false, |s| s.is_terminal()) {
            "is already terminal"
        } else {
            "cannot be skipped"
        };
        return Err(AppError::Conflict(format!(
            "Item {id} is {} and {detail}",
            current.status
        )));
    }

    let updated: Option<QueueItemRow> = sqlx::query_as(
        r#"
        UPDATE queue_items
        SET status = 'skipped', result_message = $1,
            completed_at = now(), updated_at = now()
        WHERE id = $2 AND status IN ('pending', 'failed')
        RETURNING *
        "#,
    )
    .bind(reason)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    updated.ok_or_else(|| {
        AppError::Conflict(format!("Item {id} was transitioned by another worker"))
    })
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM queue_items WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Queue item {id} not found")));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Reads & recovery
// ────────────────────────────────────────────────────────────────────────────

pub async fn get_item(pool: &PgPool, id: Uuid) -> Result<QueueItemRow, AppError> {
    sqlx::query_as("SELECT * FROM queue_items WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Queue item {id} not found")))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilters {
    pub status: Option<String>,
    pub item_type: Option<String>,
    pub company_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Paginated listing, newest first.
pub async fn list_items(
    pool: &PgPool,
    filters: &ListFilters,
) -> Result<(Vec<QueueItemRow>, i64), AppError> {
    if let Some(status) = &filters.status {
        if QueueItemStatus::parse(status).is_none() {
            return Err(AppError::Validation(format!("Unknown status '{status}'")));
        }
    }
    if let Some(item_type) = &filters.item_type {
        if QueueItemType::parse(item_type).is_none() {
            return Err(AppError::Validation(format!(
                "Unknown item type '{item_type}'"
            )));
        }
    }

    let limit = filters.limit.unwrap_or(50).clamp(1, 200);
    let offset = filters.offset.unwrap_or(0).max(0);

    let rows: Vec<QueueItemRow> = sqlx::query_as(
        r#"
        SELECT * FROM queue_items
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR item_type = $2)
          AND ($3::uuid IS NULL OR company_id = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(&filters.status)
    .bind(&filters.item_type)
    .bind(filters.company_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM queue_items
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR item_type = $2)
          AND ($3::uuid IS NULL OR company_id = $3)
        "#,
    )
    .bind(&filters.status)
    .bind(&filters.item_type)
    .bind(filters.company_id)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

/// Requeues items stuck in processing past the staleness threshold, crash
/// recovery by re-reading the store, no in-process state involved. The
/// attempt that died still counts against the budget.
pub async fn recover_stale(pool: &PgPool, threshold_secs: i64) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE queue_items
        SET status = 'pending', retry_count = LEAST(retry_count + 1, max_retries),
            error_details = 'Recovered from stale processing claim',
            updated_at = now()
        WHERE status = 'processing'
          AND processed_at < now() - ($1 * interval '1 second')
        "#,
    )
    .bind(threshold_secs)
    .execute(pool)
    .await?;

    let recovered = result.rows_affected();
    if recovered > 0 {
        warn!("Recovered {recovered} stale processing item(s) back to pending");
    }
    Ok(recovered)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn new_item(item_type: &str, url: &str) -> NewQueueItem {
        NewQueueItem {
            item_type: item_type.to_string(),
            url: url.to_string(),
            company_name: None,
            company_id: None,
            source: "manual".to_string(),
            submitted_by: None,
            max_retries: None,
            source_id: None,
            source_type: None,
            source_config: None,
            tier: None,
        }
    }

    #[test]
    fn test_validate_accepts_plain_job_item() {
        let (item_type, source) = validate_new_item(&new_item("job", "https://x.com/1")).unwrap();
        assert_eq!(item_type, QueueItemType::Job);
        assert_eq!(source, ItemSource::Manual);
        assert_eq!(source.as_str(), "manual");
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let err = validate_new_item(&new_item("widget", "https://x.com/1")).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_validate_rejects_malformed_url() {
        assert!(validate_new_item(&new_item("job", "not a url")).is_err());
        assert!(validate_new_item(&new_item("job", "ftp://x.com/1")).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_source() {
        let mut item = new_item("job", "https://x.com/1");
        item.source = "carrier_pigeon".to_string();
        let err = validate_new_item(&item).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_validate_company_requires_name() {
        let mut item = new_item("company", "https://acme.dev");
        assert!(validate_new_item(&item).is_err());
        item.company_name = Some("Acme".to_string());
        assert!(validate_new_item(&item).is_ok());
    }

    #[test]
    fn test_validate_scrape_source_requires_source_fields() {
        let mut item = new_item("scrape_source", "https://acme.dev/careers");
        assert!(validate_new_item(&item).is_err());
        item.source_id = Some(Uuid::new_v4());
        assert!(validate_new_item(&item).is_err());
        item.source_type = Some("greenhouse".to_string());
        assert!(validate_new_item(&item).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_tier() {
        let mut item = new_item("scrape_source", "https://acme.dev/careers");
        item.source_id = Some(Uuid::new_v4());
        item.source_type = Some("rss".to_string());
        item.tier = Some("Z".to_string());
        assert!(validate_new_item(&item).is_err());
    }

    #[test]
    fn test_transient_failure_requeues_within_budget() {
        assert_eq!(
            failure_disposition(0, 3, FailureClass::Transient),
            FailureDisposition::Requeue
        );
        assert_eq!(
            failure_disposition(1, 3, FailureClass::Transient),
            FailureDisposition::Requeue
        );
    }

    #[test]
    fn test_transient_failure_terminal_at_budget() {
        // Third failure with max_retries=3: retry_count goes 2 → 3, no requeue.
        assert_eq!(
            failure_disposition(2, 3, FailureClass::Transient),
            FailureDisposition::Fail
        );
        // A fourth attempt is never scheduled.
        assert_eq!(
            failure_disposition(3, 3, FailureClass::Transient),
            FailureDisposition::Fail
        );
    }

    #[test]
    fn test_terminal_failure_never_requeues() {
        assert_eq!(
            failure_disposition(0, 3, FailureClass::Terminal),
            FailureDisposition::Fail
        );
    }

    #[test]
    fn test_zero_retry_budget_fails_immediately() {
        assert_eq!(
            failure_disposition(0, 0, FailureClass::Transient),
            FailureDisposition::Fail
        );
    }
}

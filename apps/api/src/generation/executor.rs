//! Step executor: advances exactly one step of a generation request.
//!
//! Concurrency control is a conditional UPDATE: the claim only lands if the
//! step is still claimable (pending or failed) and no sibling step is
//! in_progress, so concurrent advances against one request serialize at the
//! store. A step's input is built strictly from the results of earlier
//! completed steps; a failed step is retried in place by the next advance,
//! so execution never moves past it, and re-running it never touches
//! earlier steps or their artifacts.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentError, AgentProcessRunner};
use crate::artifacts::{attempt_filename, ArtifactStore};
use crate::errors::AppError;
use crate::generation::prompts;
use crate::generation::store::{self, DocumentType, RequestView};
use crate::models::generation::{GenerationStepRow, StepName, StepStatus};

// ────────────────────────────────────────────────────────────────────────────
// Pure step-selection helpers
// ────────────────────────────────────────────────────────────────────────────

/// First step still needing work (pending or failed) in ordinal order.
/// A failed step is itself the claim target, so a later step can never
/// start while an earlier one is failed.
pub fn find_next_step(steps: &[GenerationStepRow]) -> Option<&GenerationStepRow> {
    steps
        .iter()
        .filter(|s| {
            matches!(
                s.status_enum(),
                Some(StepStatus::Pending | StepStatus::Failed)
            )
        })
        .min_by_key(|s| s.ordinal)
}

/// Results of completed steps strictly before `ordinal`, the only inputs a
/// step may see. No forward references, no failed or skipped outputs.
pub fn completed_results(
    steps: &[GenerationStepRow],
    ordinal: i32,
) -> HashMap<StepName, Value> {
    steps
        .iter()
        .filter(|s| s.ordinal < ordinal && s.status_enum() == Some(StepStatus::Completed))
        .filter_map(|s| {
            let name = s.name_enum()?;
            let result = s.result.clone()?;
            Some((name, result))
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Advance
// ────────────────────────────────────────────────────────────────────────────

struct StepFailure {
    message: String,
    code: &'static str,
}

impl From<AgentError> for StepFailure {
    fn from(e: AgentError) -> Self {
        StepFailure {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Advances the first unfinished step of a request and returns the full
/// updated step list. A failed step is claimed again and retried in place
/// (the attempt counter keeps climbing); a request with nothing left to run
/// returns its current (terminal) state, which is not an error.
pub async fn advance_step(
    pool: &PgPool,
    runner: &AgentProcessRunner,
    artifacts: &ArtifactStore,
    request_id: Uuid,
) -> Result<RequestView, AppError> {
    let request = store::get_request_row(pool, request_id).await?;
    let steps = store::fetch_steps(pool, request_id).await?;

    let Some(next) = find_next_step(&steps) else {
        return Ok(store::view_of(request_id, steps));
    };
    let step_id = next.id;
    let ordinal = next.ordinal;

    // Conditional claim: lands only while the step is still claimable and
    // no sibling is in_progress. A concurrent advance loses here, atomically.
    let claimed: Option<GenerationStepRow> = sqlx::query_as(
        r#"
        UPDATE generation_steps
        SET status = 'in_progress', started_at = now(), attempt = attempt + 1,
            error_message = NULL, error_code = NULL
        WHERE id = $1 AND status IN ('pending', 'failed')
          AND NOT EXISTS (
              SELECT 1 FROM generation_steps
              WHERE request_id = $2 AND status = 'in_progress'
          )
        RETURNING *
        "#,
    )
    .bind(step_id)
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    let Some(claimed) = claimed else {
        return Err(AppError::Conflict(format!(
            "Request {request_id} already has a step in progress"
        )));
    };

    let step_name = claimed.name_enum().ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("Corrupt step name '{}'", claimed.name))
    })?;
    info!(
        "Advancing request {request_id}: {} (attempt {})",
        claimed.name, claimed.attempt
    );

    let earlier = completed_results(&steps, ordinal);
    let outcome = run_step(
        pool,
        runner,
        artifacts,
        request_id,
        &request.context,
        step_name,
        claimed.attempt,
        &earlier,
    )
    .await;

    match outcome {
        Ok(result) => {
            let duration_ms = claimed
                .started_at
                .map(|t| (chrono::Utc::now() - t).num_milliseconds())
                .unwrap_or(0);
            let settled = sqlx::query(
                r#"
                UPDATE generation_steps
                SET status = 'completed', completed_at = now(),
                    duration_ms = $1, result = $2
                WHERE id = $3 AND status = 'in_progress'
                "#,
            )
            .bind(duration_ms)
            .bind(&result)
            .bind(step_id)
            .execute(pool)
            .await?;
            if settled.rows_affected() == 0 {
                // The stale sweep reset our claim mid-run; the result is
                // discarded and the step will run again.
                warn!(
                    "Request {request_id}: {} finished after its claim was reset, result dropped",
                    claimed.name
                );
            } else {
                info!(
                    "Request {request_id}: {} completed in {duration_ms}ms",
                    claimed.name
                );
            }
        }
        Err(failure) => {
            warn!(
                "Request {request_id}: {} failed ({}): {}",
                claimed.name, failure.code, failure.message
            );
            let settled = sqlx::query(
                r#"
                UPDATE generation_steps
                SET status = 'failed', error_message = $1, error_code = $2
                WHERE id = $3 AND status = 'in_progress'
                "#,
            )
            .bind(&failure.message)
            .bind(failure.code)
            .bind(step_id)
            .execute(pool)
            .await?;
            if settled.rows_affected() == 0 {
                warn!(
                    "Request {request_id}: {} failure not recorded, claim was reset mid-run",
                    claimed.name
                );
            }
        }
    }

    let steps = store::fetch_steps(pool, request_id).await?;
    Ok(store::view_of(request_id, steps))
}

/// Synchronous convenience: start, then advance until terminal or first
/// failure. Deliberately the same code path as the stepped API so the two
/// can never diverge.
pub async fn generate(
    pool: &PgPool,
    runner: &AgentProcessRunner,
    artifacts: &ArtifactStore,
    context: Value,
    document_types: &[DocumentType],
) -> Result<RequestView, AppError> {
    let view = store::start(pool, context, document_types).await?;
    let request_id = view.request_id;

    loop {
        let view = advance_step(pool, runner, artifacts, request_id).await?;
        let has_pending = view
            .steps
            .iter()
            .any(|s| s.status_enum() == Some(StepStatus::Pending));
        let failed = view
            .steps
            .iter()
            .any(|s| s.status_enum() == Some(StepStatus::Failed));
        if failed || !has_pending {
            return Ok(view);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Step bodies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DocumentDraft {
    markdown: String,
    #[serde(default)]
    keywords_used: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RenderedFiles {
    files: Vec<RenderedFile>,
}

#[derive(Debug, Deserialize)]
struct RenderedFile {
    name: String,
    pdf_base64: String,
}

#[allow(clippy::too_many_arguments)]
async fn run_step(
    pool: &PgPool,
    runner: &AgentProcessRunner,
    artifacts: &ArtifactStore,
    request_id: Uuid,
    context: &Value,
    step_name: StepName,
    attempt: i32,
    earlier: &HashMap<StepName, Value>,
) -> Result<Value, StepFailure> {
    let context_json = context.to_string();

    match step_name {
        StepName::CollectData => {
            let prompt = prompts::COLLECT_DATA_PROMPT.replace("{context_json}", &context_json);
            let collected = runner.invoke_value(&prompt).await?;
            Ok(collected)
        }

        StepName::GenerateResume => {
            write_document(
                pool,
                runner,
                artifacts,
                request_id,
                step_name,
                attempt,
                earlier,
                &context_json,
                prompts::GENERATE_RESUME_PROMPT,
                "resume",
            )
            .await
        }

        StepName::GenerateCoverLetter => {
            write_document(
                pool,
                runner,
                artifacts,
                request_id,
                step_name,
                attempt,
                earlier,
                &context_json,
                prompts::GENERATE_COVER_LETTER_PROMPT,
                "cover-letter",
            )
            .await
        }

        StepName::RenderPdf => {
            let documents = render_inputs(earlier);
            if documents.is_empty() {
                return Err(StepFailure {
                    message: "no completed documents available to render".to_string(),
                    code: "MISSING_INPUT",
                });
            }

            let prompt = prompts::RENDER_PDF_PROMPT
                .replace("{documents_json}", &Value::Array(documents).to_string());
            let rendered: RenderedFiles = runner.invoke_json(&prompt).await?;

            let mut stored = Vec::new();
            for file in rendered.files {
                let bytes = BASE64.decode(file.pdf_base64.as_bytes()).map_err(|e| {
                    StepFailure {
                        message: format!("pdf_base64 for '{}' is invalid: {e}", file.name),
                        code: "PARSE_ERROR",
                    }
                })?;
                let filename = attempt_filename(&format!("{}.pdf", file.name), attempt);
                artifacts
                    .put(
                        pool,
                        request_id,
                        step_name.as_str(),
                        "pdf",
                        &filename,
                        "application/pdf",
                        bytes,
                    )
                    .await
                    .map_err(|e| StepFailure {
                        message: format!("storing {filename} failed: {e}"),
                        code: "STORAGE_ERROR",
                    })?;
                stored.push(filename);
            }

            Ok(json!({ "files": stored }))
        }
    }
}

/// Shared body for the two document-writing steps: prompt with the request
/// context plus collected data, store the markdown artifact, and keep the
/// full draft in the step result so render-pdf reads no storage.
#[allow(clippy::too_many_arguments)]
async fn write_document(
    pool: &PgPool,
    runner: &AgentProcessRunner,
    artifacts: &ArtifactStore,
    request_id: Uuid,
    step_name: StepName,
    attempt: i32,
    earlier: &HashMap<StepName, Value>,
    context_json: &str,
    template: &str,
    artifact_type: &str,
) -> Result<Value, StepFailure> {
    let collected = earlier.get(&StepName::CollectData).ok_or(StepFailure {
        message: "collect-data has not completed".to_string(),
        code: "MISSING_INPUT",
    })?;

    let prompt = template
        .replace("{context_json}", context_json)
        .replace("{collected_json}", &collected.to_string());
    let draft: DocumentDraft = runner.invoke_json(&prompt).await?;

    let filename = attempt_filename(&format!("{artifact_type}.md"), attempt);
    artifacts
        .put(
            pool,
            request_id,
            step_name.as_str(),
            artifact_type,
            &filename,
            "text/markdown",
            draft.markdown.clone().into_bytes(),
        )
        .await
        .map_err(|e| StepFailure {
            message: format!("storing {filename} failed: {e}"),
            code: "STORAGE_ERROR",
        })?;

    Ok(json!({
        "markdown": draft.markdown,
        "keywords_used": draft.keywords_used,
        "artifact": filename,
    }))
}

/// Render inputs from earlier completed document steps, in pipeline order.
fn render_inputs(earlier: &HashMap<StepName, Value>) -> Vec<Value> {
    let mut documents = Vec::new();
    for (step, name) in [
        (StepName::GenerateResume, "resume"),
        (StepName::GenerateCoverLetter, "cover-letter"),
    ] {
        if let Some(markdown) = earlier
            .get(&step)
            .and_then(|r| r.get("markdown"))
            .and_then(|m| m.as_str())
        {
            documents.push(json!({ "name": name, "markdown": markdown }));
        }
    }
    documents
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn step(ordinal: i32, name: StepName, status: StepStatus, result: Option<Value>) -> GenerationStepRow {
        GenerationStepRow {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            ordinal,
            name: name.as_str().to_string(),
            status: status.as_str().to_string(),
            attempt: 1,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            result,
            error_message: None,
            error_code: None,
        }
    }

    #[test]
    fn test_next_step_follows_ordinal_order() {
        let steps = vec![
            step(0, StepName::CollectData, StepStatus::Completed, Some(json!({}))),
            step(3, StepName::RenderPdf, StepStatus::Pending, None),
            step(1, StepName::GenerateResume, StepStatus::Pending, None),
            step(2, StepName::GenerateCoverLetter, StepStatus::Skipped, None),
        ];
        let next = find_next_step(&steps).unwrap();
        assert_eq!(next.name, "generate-resume");
    }

    #[test]
    fn test_failed_step_is_retried_before_later_steps() {
        // collect-data failed on its last run. Re-advancing must target it
        // again instead of starting generate-resume without its input.
        let steps = vec![
            step(0, StepName::CollectData, StepStatus::Failed, None),
            step(1, StepName::GenerateResume, StepStatus::Pending, None),
            step(3, StepName::RenderPdf, StepStatus::Pending, None),
        ];
        let next = find_next_step(&steps).unwrap();
        assert_eq!(next.name, "collect-data");
        assert_eq!(next.ordinal, 0);
    }

    #[test]
    fn test_all_settled_leaves_nothing_to_claim() {
        let steps = vec![
            step(0, StepName::CollectData, StepStatus::Completed, Some(json!({}))),
            step(1, StepName::GenerateResume, StepStatus::Completed, Some(json!({}))),
            step(2, StepName::GenerateCoverLetter, StepStatus::Skipped, None),
            step(3, StepName::RenderPdf, StepStatus::Completed, Some(json!({}))),
        ];
        assert!(find_next_step(&steps).is_none());
    }

    #[test]
    fn test_completed_results_exclude_forward_references() {
        let steps = vec![
            step(0, StepName::CollectData, StepStatus::Completed, Some(json!({"k": 1}))),
            step(1, StepName::GenerateResume, StepStatus::Pending, None),
            // A (hypothetically) completed later step must not leak backward.
            step(3, StepName::RenderPdf, StepStatus::Completed, Some(json!({}))),
        ];
        let earlier = completed_results(&steps, 1);
        assert!(earlier.contains_key(&StepName::CollectData));
        assert!(!earlier.contains_key(&StepName::RenderPdf));
    }

    #[test]
    fn test_completed_results_exclude_failed_and_skipped() {
        let steps = vec![
            step(0, StepName::CollectData, StepStatus::Failed, Some(json!({}))),
            step(1, StepName::GenerateResume, StepStatus::Skipped, None),
        ];
        assert!(completed_results(&steps, 3).is_empty());
    }

    #[test]
    fn test_render_inputs_keep_pipeline_order() {
        let mut earlier = HashMap::new();
        earlier.insert(
            StepName::GenerateCoverLetter,
            json!({"markdown": "Dear team,"}),
        );
        earlier.insert(StepName::GenerateResume, json!({"markdown": "# Jane"}));
        let docs = render_inputs(&earlier);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["name"], "resume");
        assert_eq!(docs[1]["name"], "cover-letter");
    }

    #[test]
    fn test_render_inputs_with_single_document() {
        let mut earlier = HashMap::new();
        earlier.insert(StepName::GenerateResume, json!({"markdown": "# Jane"}));
        earlier.insert(StepName::CollectData, json!({"keywords": []}));
        let docs = render_inputs(&earlier);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], "resume");
    }

    #[test]
    fn test_step_rows_settle_timestamps_via_status() {
        // Sanity on the row shape used by the executor.
        let mut row = step(0, StepName::CollectData, StepStatus::InProgress, None);
        row.started_at = Some(Utc::now());
        assert_eq!(row.status_enum(), Some(StepStatus::InProgress));
        assert!(row.started_at.is_some());
    }
}

//! Company analysis: the queue handler for `company` items.
//!
//! Decomposed into four discrete stages (fetch → extract → analyze → save)
//! instead of one monolithic orchestrator. The first three stages are
//! behind the `CompanyStages` seam so the network/LLM work is swappable and
//! the sequencing logic stays testable; this module owns the persistence:
//! progress flags are set monotonically after each stage, so a crashed run
//! is auditable down to the stage it died in.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::agent::{AgentError, AgentProcessRunner};
use crate::models::company::{
    AnalysisProgress, AnalysisStage, BoardConfidence, CompanyRow, CompanyStatus, PendingJobBoard,
};
use crate::models::queue::QueueItemRow;
use crate::queue::dispatcher::{HandlerError, QueueHandler};

/// The pluggable stage implementations. Fetch pulls the company site,
/// extract structures it, analyze finds candidate job boards.
#[async_trait]
pub trait CompanyStages: Send + Sync {
    async fn fetch(&self, company: &CompanyRow) -> Result<String, HandlerError>;
    async fn extract(&self, raw_html: &str) -> Result<Value, HandlerError>;
    async fn analyze(&self, facts: &Value) -> Result<Vec<PendingJobBoard>, HandlerError>;
}

pub struct CompanyAnalysisHandler {
    pool: PgPool,
    stages: Arc<dyn CompanyStages>,
}

impl CompanyAnalysisHandler {
    pub fn new(pool: PgPool, stages: Arc<dyn CompanyStages>) -> Self {
        Self { pool, stages }
    }

    async fn run_analysis(&self, company_id: Uuid) -> Result<String, HandlerError> {
        let company = self.load_company(company_id).await?;
        // Checked before any status write so a skipped company is left
        // exactly as it was.
        if company.website.as_deref().map_or(true, str::is_empty) {
            return Err(HandlerError::Skip(format!(
                "Company {company_id} has no website to analyze"
            )));
        }
        if company.progress().is_complete() {
            info!("Re-analyzing company {company_id} (previous run complete)");
        }

        // New run: status analyzing, progress reset. Flags are monotonic
        // within the run from here on.
        let mut progress = AnalysisProgress::default();
        self.write_progress(company_id, CompanyStatus::Analyzing, &progress)
            .await?;

        let raw = self.stages.fetch(&company).await?;
        progress.mark(AnalysisStage::Fetch);
        self.write_progress(company_id, CompanyStatus::Analyzing, &progress)
            .await?;

        let facts = self.stages.extract(&raw).await?;
        progress.mark(AnalysisStage::Extract);
        self.write_progress(company_id, CompanyStatus::Analyzing, &progress)
            .await?;

        let discovered = self.stages.analyze(&facts).await?;
        progress.mark(AnalysisStage::Analyze);
        self.write_progress(company_id, CompanyStatus::Analyzing, &progress)
            .await?;

        let boards = merge_job_boards(company.job_boards(), discovered);
        let board_count = boards.len();
        self.save_boards(company_id, &boards).await?;
        progress.mark(AnalysisStage::Save);
        self.write_progress(company_id, CompanyStatus::Active, &progress)
            .await?;

        info!("Company {company_id} analyzed: {board_count} pending job board(s)");
        Ok(format!(
            "Analysis complete: {board_count} pending job board(s)"
        ))
    }

    async fn load_company(&self, id: Uuid) -> Result<CompanyRow, HandlerError> {
        sqlx::query_as::<_, CompanyRow>("SELECT * FROM companies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| HandlerError::Transient(format!("Company lookup failed: {e}")))?
            .ok_or_else(|| HandlerError::Terminal(format!("Company {id} does not exist")))
    }

    async fn write_progress(
        &self,
        id: Uuid,
        status: CompanyStatus,
        progress: &AnalysisProgress,
    ) -> Result<(), HandlerError> {
        let value = serde_json::to_value(progress)
            .map_err(|e| HandlerError::Terminal(format!("Progress serialization failed: {e}")))?;
        sqlx::query(
            "UPDATE companies SET status = $1, analysis_progress = $2, updated_at = now() WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(value)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HandlerError::Transient(format!("Progress write failed: {e}")))?;
        Ok(())
    }

    async fn save_boards(
        &self,
        id: Uuid,
        boards: &[PendingJobBoard],
    ) -> Result<(), HandlerError> {
        let value = serde_json::to_value(boards)
            .map_err(|e| HandlerError::Terminal(format!("Board serialization failed: {e}")))?;
        sqlx::query(
            "UPDATE companies SET pending_job_boards = $1, updated_at = now() WHERE id = $2",
        )
        .bind(value)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HandlerError::Transient(format!("Board write failed: {e}")))?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) {
        // Best effort; the queue item carries the authoritative error.
        let _ = sqlx::query("UPDATE companies SET status = $1, updated_at = now() WHERE id = $2")
            .bind(CompanyStatus::Failed.as_str())
            .bind(id)
            .execute(&self.pool)
            .await;
    }
}

#[async_trait]
impl QueueHandler for CompanyAnalysisHandler {
    async fn handle(&self, item: &QueueItemRow) -> Result<String, HandlerError> {
        let company_id = item.company_id.ok_or_else(|| {
            HandlerError::Terminal("company item is missing company_id".to_string())
        })?;

        match self.run_analysis(company_id).await {
            Ok(message) => Ok(message),
            // A skip is not a failure; the company record stays as-is.
            Err(e @ HandlerError::Skip(_)) => Err(e),
            Err(e) => {
                self.mark_failed(company_id).await;
                Err(e)
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Agent-backed stages
// ────────────────────────────────────────────────────────────────────────────

const FETCH_PROMPT: &str = r#"Fetch the company website below and return its visible text content.

Return a JSON object with this EXACT schema:
{"content": "..."}

Company: {name}
Website: {website}"#;

const EXTRACT_PROMPT: &str = r#"Extract structured facts about this company from the page text below.

Return a JSON object with this EXACT schema:
{"industry": "...", "size_hint": "...", "tech_stack": ["..."], "locations": ["..."]}

Only use facts present in the text.

PAGE TEXT:
{content}"#;

const ANALYZE_PROMPT: &str = r#"From the company facts below, list URLs that are likely the company's job board or careers page.

Return a JSON object with this EXACT schema:
{
  "job_boards": [
    {"url": "https://...", "confidence": "high|medium|low"}
  ]
}

Return an empty list if nothing qualifies. Do NOT invent URLs.

COMPANY FACTS:
{facts}"#;

/// Default `CompanyStages`: every stage is one agent invocation. The agent
/// does the fetching itself, so the service makes no outbound HTTP calls.
pub struct AgentCompanyStages {
    runner: AgentProcessRunner,
}

impl AgentCompanyStages {
    pub fn new(runner: AgentProcessRunner) -> Self {
        Self { runner }
    }
}

fn agent_error(e: AgentError) -> HandlerError {
    if e.is_retryable() {
        HandlerError::Transient(e.to_string())
    } else {
        HandlerError::Terminal(e.to_string())
    }
}

#[derive(serde::Deserialize)]
struct DiscoveredBoard {
    url: String,
    confidence: BoardConfidence,
}

#[derive(serde::Deserialize)]
struct DiscoveredBoards {
    #[serde(default)]
    job_boards: Vec<DiscoveredBoard>,
}

#[async_trait]
impl CompanyStages for AgentCompanyStages {
    async fn fetch(&self, company: &CompanyRow) -> Result<String, HandlerError> {
        let website = company.website.as_deref().ok_or_else(|| {
            HandlerError::Terminal(format!("Company {} has no website to analyze", company.id))
        })?;
        let prompt = FETCH_PROMPT
            .replace("{name}", &company.name)
            .replace("{website}", website);
        let value = self.runner.invoke_value(&prompt).await.map_err(agent_error)?;
        value["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| HandlerError::Terminal("fetch returned no content field".to_string()))
    }

    async fn extract(&self, raw_html: &str) -> Result<Value, HandlerError> {
        let prompt = EXTRACT_PROMPT.replace("{content}", raw_html);
        self.runner.invoke_value(&prompt).await.map_err(agent_error)
    }

    async fn analyze(&self, facts: &Value) -> Result<Vec<PendingJobBoard>, HandlerError> {
        let prompt = ANALYZE_PROMPT.replace("{facts}", &facts.to_string());
        let discovered: DiscoveredBoards =
            self.runner.invoke_json(&prompt).await.map_err(agent_error)?;
        Ok(discovered
            .job_boards
            .into_iter()
            .map(|b| PendingJobBoard {
                url: b.url,
                confidence: b.confidence,
                requires_validation: true,
                discovered_at: chrono::Utc::now(),
            })
            .collect())
    }
}

/// Merges freshly-discovered boards into the existing pending list, deduping
/// by url. An already-known board keeps its original discovered_at.
pub fn merge_job_boards(
    existing: Vec<PendingJobBoard>,
    discovered: Vec<PendingJobBoard>,
) -> Vec<PendingJobBoard> {
    let mut merged = existing;
    for board in discovered {
        if !merged.iter().any(|b| b.url == board.url) {
            merged.push(board);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::company::BoardConfidence;
    use chrono::{Duration, Utc};

    fn board(url: &str, discovered_hours_ago: i64) -> PendingJobBoard {
        PendingJobBoard {
            url: url.to_string(),
            confidence: BoardConfidence::Medium,
            requires_validation: true,
            discovered_at: Utc::now() - Duration::hours(discovered_hours_ago),
        }
    }

    #[test]
    fn test_merge_dedupes_by_url() {
        let existing = vec![board("https://acme.dev/careers", 48)];
        let discovered = vec![
            board("https://acme.dev/careers", 0),
            board("https://boards.greenhouse.io/acme", 0),
        ];
        let merged = merge_job_boards(existing.clone(), discovered);
        assert_eq!(merged.len(), 2);
        // The known board keeps its original discovery time.
        assert_eq!(merged[0].discovered_at, existing[0].discovered_at);
    }

    #[test]
    fn test_merge_with_no_existing_boards() {
        let merged = merge_job_boards(vec![], vec![board("https://acme.dev/jobs", 0)]);
        assert_eq!(merged.len(), 1);
    }
}

//! Generation requests, their ordered steps, and artifact records.
//!
//! A request's step list is fixed at creation: one row per step name in
//! ordinal order, each either pending or (for document types the caller did
//! not ask for) already skipped. Steps are mutated one at a time by the
//! executor; completed and skipped are terminal, failed is recoverable by
//! re-advancing the same ordinal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// The fixed generation pipeline, in ordinal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    CollectData,
    GenerateResume,
    GenerateCoverLetter,
    RenderPdf,
}

impl StepName {
    /// All steps in execution order. Ordinals are indices into this slice.
    pub const ALL: [StepName; 4] = [
        StepName::CollectData,
        StepName::GenerateResume,
        StepName::GenerateCoverLetter,
        StepName::RenderPdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::CollectData => "collect-data",
            StepName::GenerateResume => "generate-resume",
            StepName::GenerateCoverLetter => "generate-cover-letter",
            StepName::RenderPdf => "render-pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collect-data" => Some(StepName::CollectData),
            "generate-resume" => Some(StepName::GenerateResume),
            "generate-cover-letter" => Some(StepName::GenerateCoverLetter),
            "render-pdf" => Some(StepName::RenderPdf),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> i32 {
        match self {
            StepName::CollectData => 0,
            StepName::GenerateResume => 1,
            StepName::GenerateCoverLetter => 2,
            StepName::RenderPdf => 3,
        }
    }
}

/// Step lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "in_progress" => Some(StepStatus::InProgress),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            "skipped" => Some(StepStatus::Skipped),
            _ => None,
        }
    }

    /// completed and skipped never run again; failed is recoverable.
    pub fn is_settled(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Overall request status derived from its steps; never stored, always
/// recomputed, so it cannot drift from the step rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

/// Derives the request status: complete iff every step is completed or
/// skipped; failed if any step is failed; in_progress if any step has started.
pub fn derive_request_status(statuses: &[StepStatus]) -> RequestStatus {
    if statuses.iter().all(|s| s.is_settled()) {
        return RequestStatus::Complete;
    }
    if statuses.iter().any(|s| *s == StepStatus::Failed) {
        return RequestStatus::Failed;
    }
    if statuses
        .iter()
        .any(|s| matches!(s, StepStatus::InProgress | StepStatus::Completed))
    {
        return RequestStatus::InProgress;
    }
    RequestStatus::Pending
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationRequestRow {
    pub id: Uuid,
    /// Caller-supplied context: job posting, company, user profile reference.
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationStepRow {
    pub id: Uuid,
    pub request_id: Uuid,
    pub ordinal: i32,
    pub name: String,
    pub status: String,
    /// How many times this ordinal has been attempted (first run = 1).
    pub attempt: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Structured output of a completed step, fed into later steps.
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

impl GenerationStepRow {
    pub fn status_enum(&self) -> Option<StepStatus> {
        StepStatus::parse(&self.status)
    }

    pub fn name_enum(&self) -> Option<StepName> {
        StepName::parse(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArtifactRow {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_name: String,
    pub artifact_type: String,
    pub filename: String,
    pub storage_path: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

//! Company rows and the per-run analysis progress ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Pending,
    Analyzing,
    Active,
    Failed,
}

impl CompanyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyStatus::Pending => "pending",
            CompanyStatus::Analyzing => "analyzing",
            CompanyStatus::Active => "active",
            CompanyStatus::Failed => "failed",
        }
    }
}

/// Per-run analysis stage flags. Each flag is monotonically set true within a
/// run and never reset mid-run; `mark` is the only mutation path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub fetch: bool,
    pub extract: bool,
    pub analyze: bool,
    pub save: bool,
}

/// The four company-analysis stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Fetch,
    Extract,
    Analyze,
    Save,
}

impl AnalysisProgress {
    /// Sets a stage flag. Flags only ever go false → true; marking a stage
    /// that is already complete is a no-op.
    pub fn mark(&mut self, stage: AnalysisStage) {
        match stage {
            AnalysisStage::Fetch => self.fetch = true,
            AnalysisStage::Extract => self.extract = true,
            AnalysisStage::Analyze => self.analyze = true,
            AnalysisStage::Save => self.save = true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fetch && self.extract && self.analyze && self.save
    }
}

/// Confidence that a discovered URL is actually the company's job board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardConfidence {
    High,
    Medium,
    Low,
}

/// A job-board URL discovered during company analysis, awaiting validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJobBoard {
    pub url: String,
    pub confidence: BoardConfidence,
    pub requires_validation: bool,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompanyRow {
    pub id: Uuid,
    pub name: String,
    pub website: Option<String>,
    pub status: String,
    /// JSON-encoded `AnalysisProgress`.
    pub analysis_progress: Value,
    /// JSON-encoded `Vec<PendingJobBoard>`.
    pub pending_job_boards: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompanyRow {
    pub fn progress(&self) -> AnalysisProgress {
        serde_json::from_value(self.analysis_progress.clone()).unwrap_or_default()
    }

    pub fn job_boards(&self) -> Vec<PendingJobBoard> {
        serde_json::from_value(self.pending_job_boards.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_marks_are_monotonic() {
        let mut progress = AnalysisProgress::default();
        progress.mark(AnalysisStage::Fetch);
        assert!(progress.fetch);

        // Re-marking never clears anything
        progress.mark(AnalysisStage::Fetch);
        assert!(progress.fetch);
        assert!(!progress.extract);
    }

    #[test]
    fn test_progress_complete_requires_all_stages() {
        let mut progress = AnalysisProgress::default();
        for stage in [
            AnalysisStage::Fetch,
            AnalysisStage::Extract,
            AnalysisStage::Analyze,
        ] {
            progress.mark(stage);
            assert!(!progress.is_complete());
        }
        progress.mark(AnalysisStage::Save);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_pending_job_board_serialization() {
        let board = PendingJobBoard {
            url: "https://acme.dev/careers".to_string(),
            confidence: BoardConfidence::High,
            requires_validation: true,
            discovered_at: Utc::now(),
        };
        let json = serde_json::to_value(&board).unwrap();
        assert_eq!(json["confidence"], "high");
        let recovered: PendingJobBoard = serde_json::from_value(json).unwrap();
        assert_eq!(recovered.url, board.url);
    }
}

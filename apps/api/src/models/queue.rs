//! Queue item rows and the status state machine.
//!
//! Statuses are stored as TEXT; the enums here are the single source of truth
//! for legal values and transitions. The store refuses any write that is not
//! a legal transition, so the table can never hold an impossible lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Kinds of work the queue tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemType {
    Job,
    Company,
    Scrape,
    SourceDiscovery,
    ScrapeSource,
}

impl QueueItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemType::Job => "job",
            QueueItemType::Company => "company",
            QueueItemType::Scrape => "scrape",
            QueueItemType::SourceDiscovery => "source_discovery",
            QueueItemType::ScrapeSource => "scrape_source",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "job" => Some(QueueItemType::Job),
            "company" => Some(QueueItemType::Company),
            "scrape" => Some(QueueItemType::Scrape),
            "source_discovery" => Some(QueueItemType::SourceDiscovery),
            "scrape_source" => Some(QueueItemType::ScrapeSource),
            _ => None,
        }
    }
}

/// Queue item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Success => "success",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueItemStatus::Pending),
            "processing" => Some(QueueItemStatus::Processing),
            "success" => Some(QueueItemStatus::Success),
            "failed" => Some(QueueItemStatus::Failed),
            "skipped" => Some(QueueItemStatus::Skipped),
            _ => None,
        }
    }

    /// success and skipped never transition again; failed only via manual retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Success | QueueItemStatus::Failed | QueueItemStatus::Skipped
        )
    }

    /// An item counts toward the (type, url) dedup check while active.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueItemStatus::Pending | QueueItemStatus::Processing)
    }

    /// Legal transitions:
    /// pending → processing → {success, failed, skipped}, failed → pending.
    /// pending → skipped (stop-list or manual skip before dispatch) and
    /// failed → skipped (manual abort) are also legal.
    pub fn can_transition_to(&self, next: QueueItemStatus) -> bool {
        use QueueItemStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Skipped)
                | (Processing, Success)
                | (Processing, Failed)
                | (Processing, Skipped)
                | (Processing, Pending) // auto-retry requeue / stale recovery
                | (Failed, Pending) // manual retry
                | (Failed, Skipped) // manual abort
        )
    }
}

/// How an item entered the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    Manual,
    Discovery,
    Scheduler,
}

impl ItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSource::Manual => "manual",
            ItemSource::Discovery => "discovery",
            ItemSource::Scheduler => "scheduler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(ItemSource::Manual),
            "discovery" => Some(ItemSource::Discovery),
            "scheduler" => Some(ItemSource::Scheduler),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueItemRow {
    pub id: Uuid,
    pub item_type: String,
    pub status: String,
    pub url: String,
    pub company_name: Option<String>,
    pub company_id: Option<Uuid>,
    pub source: String,
    pub submitted_by: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Dequeue ordering weight, derived from tier for scrape_source items.
    pub priority: i32,
    pub result_message: Option<String>,
    pub error_details: Option<String>,
    pub source_id: Option<Uuid>,
    pub source_type: Option<String>,
    pub source_config: Option<Value>,
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItemRow {
    pub fn status_enum(&self) -> Option<QueueItemStatus> {
        QueueItemStatus::parse(&self.status)
    }

    pub fn type_enum(&self) -> Option<QueueItemType> {
        QueueItemType::parse(&self.item_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in ["pending", "processing", "success", "failed", "skipped"] {
            assert_eq!(QueueItemStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(QueueItemStatus::parse("bogus").is_none());
    }

    #[test]
    fn test_terminal_states_never_transition() {
        use QueueItemStatus::*;
        for terminal in [Success, Skipped] {
            for next in [Pending, Processing, Success, Failed, Skipped] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal:?} must not transition to {next:?}"
                );
            }
        }
    }

    #[test]
    fn test_failed_recovers_to_pending_or_skipped_only() {
        use QueueItemStatus::*;
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Skipped));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Success));
    }

    #[test]
    fn test_no_processing_to_processing() {
        assert!(!QueueItemStatus::Processing.can_transition_to(QueueItemStatus::Processing));
    }

    #[test]
    fn test_pending_can_be_skipped_before_dispatch() {
        // Stop-list skip happens without the item ever reaching processing.
        assert!(QueueItemStatus::Pending.can_transition_to(QueueItemStatus::Skipped));
    }

    #[test]
    fn test_active_statuses() {
        assert!(QueueItemStatus::Pending.is_active());
        assert!(QueueItemStatus::Processing.is_active());
        assert!(!QueueItemStatus::Failed.is_active());
        assert!(!QueueItemStatus::Success.is_active());
    }

    #[test]
    fn test_item_type_roundtrip() {
        for t in ["job", "company", "scrape", "source_discovery", "scrape_source"] {
            assert_eq!(QueueItemType::parse(t).unwrap().as_str(), t);
        }
    }
}

//! Discovered job sources, their priority tiers, and scraping schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    PendingValidation,
    Active,
    Disabled,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::PendingValidation => "pending_validation",
            SourceStatus::Active => "active",
            SourceStatus::Disabled => "disabled",
            SourceStatus::Failed => "failed",
        }
    }
}

/// Priority band for a discovered source: S (highest) .. D (lowest).
/// Feeds dispatch ordering; higher tier dequeues first at equal created_at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    S,
    A,
    B,
    C,
    D,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::S => "S",
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "S" => Some(Tier::S),
            "A" => Some(Tier::A),
            "B" => Some(Tier::B),
            "C" => Some(Tier::C),
            "D" => Some(Tier::D),
            _ => None,
        }
    }

    /// Numeric dequeue priority: S=4 .. D=0.
    pub fn priority(&self) -> i32 {
        match self {
            Tier::S => 4,
            Tier::A => 3,
            Tier::B => 2,
            Tier::C => 1,
            Tier::D => 0,
        }
    }
}

/// When and how often a source is scraped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingSchedule {
    /// e.g. "hourly", "daily", "weekly"
    pub frequency: String,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub next_scrape_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobSourceRow {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub name: String,
    pub url: String,
    pub status: String,
    pub tier: String,
    pub source_type: String,
    pub source_config: Value,
    pub scrape_frequency: String,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_scrape_at: Option<DateTime<Utc>>,
    /// Historical scrape stats feeding the scorer's match-rate signal.
    pub jobs_found: i64,
    pub jobs_matched: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSourceRow {
    pub fn tier_enum(&self) -> Option<Tier> {
        Tier::parse(&self.tier)
    }

    pub fn schedule(&self) -> ScrapingSchedule {
        ScrapingSchedule {
            frequency: self.scrape_frequency.clone(),
            last_scraped_at: self.last_scraped_at,
            next_scrape_at: self.next_scrape_at,
        }
    }

    /// Fraction of scraped jobs that survived review, 0.0 when unscraped.
    pub fn match_rate(&self) -> f64 {
        if self.jobs_found == 0 {
            0.0
        } else {
            self.jobs_matched as f64 / self.jobs_found as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_priority_ordering() {
        assert!(Tier::S.priority() > Tier::A.priority());
        assert!(Tier::A.priority() > Tier::B.priority());
        assert!(Tier::B.priority() > Tier::C.priority());
        assert!(Tier::C.priority() > Tier::D.priority());
    }

    #[test]
    fn test_tier_roundtrip() {
        for t in ["S", "A", "B", "C", "D"] {
            assert_eq!(Tier::parse(t).unwrap().as_str(), t);
        }
        assert!(Tier::parse("E").is_none());
    }

    #[test]
    fn test_tier_enum_reads_row_tier() {
        let mut row = sample_row();
        assert_eq!(row.tier_enum(), Some(Tier::B));
        row.tier = "unranked".to_string();
        assert_eq!(row.tier_enum(), None);
    }

    #[test]
    fn test_match_rate_handles_unscraped_source() {
        let mut row = sample_row();
        row.jobs_found = 0;
        row.jobs_matched = 0;
        assert_eq!(row.match_rate(), 0.0);

        row.jobs_found = 10;
        row.jobs_matched = 4;
        assert!((row.match_rate() - 0.4).abs() < f64::EPSILON);
    }

    fn sample_row() -> JobSourceRow {
        JobSourceRow {
            id: Uuid::new_v4(),
            company_id: None,
            name: "acme careers".to_string(),
            url: "https://acme.dev/careers".to_string(),
            status: "active".to_string(),
            tier: "B".to_string(),
            source_type: "greenhouse".to_string(),
            source_config: serde_json::json!({}),
            scrape_frequency: "daily".to_string(),
            last_scraped_at: None,
            last_success_at: None,
            next_scrape_at: None,
            jobs_found: 0,
            jobs_matched: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

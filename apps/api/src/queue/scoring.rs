//! Source scoring: pluggable, trait-based tier assignment for scrape sources.
//!
//! Default: `WeightedSourceScorer` (pure-Rust, deterministic, fully testable).
//! `AppState` holds an `Arc<dyn SourceScorer>`, swapped at startup.
//!
//! A source is re-scored whenever its source_config or company linkage
//! changes; the resulting tier feeds dispatch ordering (higher tier dequeues
//! first at equal created_at). Equal scores favor the source with the most
//! recent successful scrape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::cmp::Ordering;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::source::{JobSourceRow, SourceStatus, Tier};

// ────────────────────────────────────────────────────────────────────────────
// Signals & trait
// ────────────────────────────────────────────────────────────────────────────

/// Normalized scoring inputs, each in 0.0 – 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSignals {
    /// How well the source's postings align with the tracked stack.
    pub stack_alignment: f64,
    /// Company/board size signal (larger boards surface more postings).
    pub size_signal: f64,
    /// Historical fraction of scraped jobs that survived review.
    pub match_rate: f64,
}

impl SourceSignals {
    /// Extracts signals from a source row. Alignment and size are written
    /// into source_config by discovery; match rate comes from scrape stats.
    pub fn from_row(row: &JobSourceRow) -> Self {
        let config_signal = |key: &str| {
            row.source_config
                .get(key)
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0)
        };
        SourceSignals {
            stack_alignment: config_signal("stack_alignment"),
            size_signal: config_signal("size_signal"),
            match_rate: row.match_rate().clamp(0.0, 1.0),
        }
    }
}

/// The source scorer trait. Implement this to swap scoring formulas without
/// touching the store, dispatcher, or handler code.
#[async_trait]
pub trait SourceScorer: Send + Sync {
    async fn score(&self, signals: &SourceSignals) -> Result<f64, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// WeightedSourceScorer, the default implementation
// ────────────────────────────────────────────────────────────────────────────

/// Weighted linear combination of the three signals.
///
/// Default weights: stack alignment 0.45, match rate 0.35, size 0.20.
/// Tier bands: S ≥ 0.85, A ≥ 0.65, B ≥ 0.45, C ≥ 0.25, else D.
pub struct WeightedSourceScorer {
    pub stack_weight: f64,
    pub match_weight: f64,
    pub size_weight: f64,
}

impl Default for WeightedSourceScorer {
    fn default() -> Self {
        Self {
            stack_weight: 0.45,
            match_weight: 0.35,
            size_weight: 0.20,
        }
    }
}

#[async_trait]
impl SourceScorer for WeightedSourceScorer {
    async fn score(&self, signals: &SourceSignals) -> Result<f64, AppError> {
        let total = self.stack_weight + self.match_weight + self.size_weight;
        if total <= 0.0 {
            return Err(AppError::Configuration(
                "scorer weights must sum to a positive value".to_string(),
            ));
        }
        let raw = signals.stack_alignment * self.stack_weight
            + signals.match_rate * self.match_weight
            + signals.size_signal * self.size_weight;
        Ok((raw / total).clamp(0.0, 1.0))
    }
}

/// Maps a normalized score into a tier band.
pub fn tier_for_score(score: f64) -> Tier {
    if score >= 0.85 {
        Tier::S
    } else if score >= 0.65 {
        Tier::A
    } else if score >= 0.45 {
        Tier::B
    } else if score >= 0.25 {
        Tier::C
    } else {
        Tier::D
    }
}

/// Orders two sources for dispatch: higher score first; at equal scores the
/// source with the most recent successful scrape wins.
pub fn compare_sources(
    a_score: f64,
    a_last_success: Option<DateTime<Utc>>,
    b_score: f64,
    b_last_success: Option<DateTime<Utc>>,
) -> Ordering {
    match b_score.partial_cmp(&a_score).unwrap_or(Ordering::Equal) {
        Ordering::Equal => b_last_success.cmp(&a_last_success),
        other => other,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ranking
// ────────────────────────────────────────────────────────────────────────────

/// A source with its freshly-computed score, in dispatch order.
#[derive(Debug, Clone, Serialize)]
pub struct RankedSource {
    pub source_id: Uuid,
    pub name: String,
    pub url: String,
    pub tier: String,
    pub score: f64,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Scores every non-disabled source and returns them in dispatch order:
/// higher score first, ties broken by the most recent successful scrape.
pub async fn rank_sources(
    pool: &PgPool,
    scorer: &dyn SourceScorer,
) -> Result<Vec<RankedSource>, AppError> {
    let rows: Vec<JobSourceRow> =
        sqlx::query_as("SELECT * FROM job_sources WHERE status <> 'disabled'")
            .fetch_all(pool)
            .await?;

    let mut scored = Vec::with_capacity(rows.len());
    for row in rows {
        let score = scorer.score(&SourceSignals::from_row(&row)).await?;
        scored.push((row, score));
    }
    Ok(sort_ranked(scored))
}

/// Pure ordering step behind `rank_sources`.
fn sort_ranked(mut scored: Vec<(JobSourceRow, f64)>) -> Vec<RankedSource> {
    scored.sort_by(|a, b| compare_sources(a.1, a.0.last_success_at, b.1, b.0.last_success_at));
    scored
        .into_iter()
        .map(|(row, score)| RankedSource {
            source_id: row.id,
            name: row.name,
            url: row.url,
            tier: row.tier,
            score,
            last_success_at: row.last_success_at,
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Re-scoring
// ────────────────────────────────────────────────────────────────────────────

/// Re-scores one source and persists its tier, also refreshing the priority
/// of any still-active queue items for it. Called whenever source_config or
/// company linkage changes.
pub async fn rescore_source(
    pool: &PgPool,
    scorer: &dyn SourceScorer,
    source_id: Uuid,
) -> Result<JobSourceRow, AppError> {
    let mut row: JobSourceRow = sqlx::query_as("SELECT * FROM job_sources WHERE id = $1")
        .bind(source_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Source {source_id} not found")))?;

    if row.status == SourceStatus::Disabled.as_str() {
        return Err(AppError::Conflict(format!(
            "Source {source_id} is disabled and cannot be re-scored"
        )));
    }

    let signals = SourceSignals::from_row(&row);
    let score = scorer.score(&signals).await?;
    let tier = tier_for_score(score);

    if row.tier_enum() == Some(tier) {
        info!(
            "Re-scored source {} to {:.3}; tier {} unchanged",
            source_id,
            score,
            tier.as_str()
        );
        return Ok(row);
    }

    sqlx::query("UPDATE job_sources SET tier = $1, updated_at = now() WHERE id = $2")
        .bind(tier.as_str())
        .bind(source_id)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        UPDATE queue_items
        SET tier = $1, priority = $2, updated_at = now()
        WHERE source_id = $3 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(tier.as_str())
    .bind(tier.priority())
    .bind(source_id)
    .execute(pool)
    .await?;

    info!(
        "Re-scored source {} to {:.3} (tier {})",
        source_id,
        score,
        tier.as_str()
    );
    row.tier = tier.as_str().to_string();
    Ok(row)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signals(stack: f64, matches: f64, size: f64) -> SourceSignals {
        SourceSignals {
            stack_alignment: stack,
            match_rate: matches,
            size_signal: size,
        }
    }

    #[tokio::test]
    async fn test_perfect_signals_score_tier_s() {
        let scorer = WeightedSourceScorer::default();
        let score = scorer.score(&signals(1.0, 1.0, 1.0)).await.unwrap();
        assert!((score - 1.0).abs() < 1e-9);
        assert_eq!(tier_for_score(score), Tier::S);
    }

    #[tokio::test]
    async fn test_zero_signals_score_tier_d() {
        let scorer = WeightedSourceScorer::default();
        let score = scorer.score(&signals(0.0, 0.0, 0.0)).await.unwrap();
        assert_eq!(score, 0.0);
        assert_eq!(tier_for_score(score), Tier::D);
    }

    #[tokio::test]
    async fn test_stack_alignment_dominates_size() {
        let scorer = WeightedSourceScorer::default();
        let aligned = scorer.score(&signals(1.0, 0.0, 0.0)).await.unwrap();
        let large = scorer.score(&signals(0.0, 0.0, 1.0)).await.unwrap();
        assert!(aligned > large);
    }

    #[test]
    fn test_tier_band_boundaries() {
        assert_eq!(tier_for_score(0.85), Tier::S);
        assert_eq!(tier_for_score(0.84), Tier::A);
        assert_eq!(tier_for_score(0.65), Tier::A);
        assert_eq!(tier_for_score(0.45), Tier::B);
        assert_eq!(tier_for_score(0.25), Tier::C);
        assert_eq!(tier_for_score(0.24), Tier::D);
    }

    #[test]
    fn test_tie_break_favors_freshest_successful_scrape() {
        let now = Utc::now();
        let older = Some(now - Duration::days(7));
        let newer = Some(now - Duration::hours(1));

        // Equal scores: the fresher source sorts first.
        assert_eq!(compare_sources(0.5, newer, 0.5, older), Ordering::Less);
        assert_eq!(compare_sources(0.5, older, 0.5, newer), Ordering::Greater);
        // A never-scraped source loses the tie.
        assert_eq!(compare_sources(0.5, newer, 0.5, None), Ordering::Less);
    }

    #[test]
    fn test_higher_score_wins_regardless_of_freshness() {
        let now = Utc::now();
        assert_eq!(
            compare_sources(0.9, None, 0.5, Some(now)),
            Ordering::Less
        );
    }

    fn source_row(name: &str, last_success_at: Option<DateTime<Utc>>) -> JobSourceRow {
        JobSourceRow {
            id: Uuid::new_v4(),
            company_id: None,
            name: name.to_string(),
            url: format!("https://{name}.dev/careers"),
            status: "active".to_string(),
            tier: "B".to_string(),
            source_type: "greenhouse".to_string(),
            source_config: serde_json::json!({}),
            scrape_frequency: "daily".to_string(),
            last_scraped_at: None,
            last_success_at,
            next_scrape_at: None,
            jobs_found: 0,
            jobs_matched: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ranking_orders_by_score_then_freshness() {
        let now = Utc::now();
        let scored = vec![
            (source_row("stale-mid", Some(now - Duration::days(30))), 0.5),
            (source_row("top", None), 0.9),
            (source_row("fresh-mid", Some(now - Duration::hours(1))), 0.5),
        ];
        let ranked = sort_ranked(scored);
        let names: Vec<&str> = ranked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["top", "fresh-mid", "stale-mid"]);
    }

    #[test]
    fn test_signals_from_row_clamp_out_of_range_config() {
        let row = JobSourceRow {
            id: Uuid::new_v4(),
            company_id: None,
            name: "x".to_string(),
            url: "https://x.dev".to_string(),
            status: "active".to_string(),
            tier: "D".to_string(),
            source_type: "rss".to_string(),
            source_config: serde_json::json!({"stack_alignment": 3.5, "size_signal": -1.0}),
            scrape_frequency: "daily".to_string(),
            last_scraped_at: None,
            last_success_at: None,
            next_scrape_at: None,
            jobs_found: 4,
            jobs_matched: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let s = SourceSignals::from_row(&row);
        assert_eq!(s.stack_alignment, 1.0);
        assert_eq!(s.size_signal, 0.0);
        assert!((s.match_rate - 0.5).abs() < f64::EPSILON);
    }
}

//! Queue dispatcher: claims eligible items and records their outcomes.
//!
//! One dispatch cycle: reload the stop list (rule edits apply immediately),
//! recover stale claims, claim the next eligible item, run the registered
//! handler for its type, classify the result, and write it back. The loop
//! can be replicated across processes; every mutation goes through the
//! store's conditional updates.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::queue::{QueueItemRow, QueueItemType};
use crate::queue::store::{self, FailureClass, Outcome};
use crate::queue::stoplist::StopList;

/// A handler refusal, pre-classified by the handler itself. The dispatcher
/// maps Transient to the auto-retry path, Terminal to permanent failure,
/// and Skip to a skipped (not failed) item.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("terminal: {0}")]
    Terminal(String),

    /// The item needs no work, e.g. a company with nothing to analyze.
    /// Settles as skipped without consuming the retry budget.
    #[error("skipped: {0}")]
    Skip(String),
}

impl HandlerError {
    /// Failure classification. Skip is turned into a skipped outcome before
    /// the failure path and never reaches the retry policy.
    pub fn class(&self) -> FailureClass {
        match self {
            HandlerError::Transient(_) => FailureClass::Transient,
            HandlerError::Terminal(_) | HandlerError::Skip(_) => FailureClass::Terminal,
        }
    }
}

/// Processes one claimed queue item. Implementations do the actual network
/// and analysis work; the dispatcher owns all status bookkeeping.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, item: &QueueItemRow) -> Result<String, HandlerError>;
}

/// What one dispatch cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// Nothing eligible to claim.
    Idle,
    Succeeded(Uuid),
    Failed(Uuid),
}

pub struct Dispatcher {
    pool: PgPool,
    handlers: HashMap<QueueItemType, Arc<dyn QueueHandler>>,
    stale_claim_secs: i64,
}

impl Dispatcher {
    pub fn new(pool: PgPool, stale_claim_secs: i64) -> Self {
        Self {
            pool,
            handlers: HashMap::new(),
            stale_claim_secs,
        }
    }

    pub fn register(mut self, item_type: QueueItemType, handler: Arc<dyn QueueHandler>) -> Self {
        self.handlers.insert(item_type, handler);
        self
    }

    /// Runs one dispatch cycle: claim at most one item and record its outcome.
    pub async fn dispatch_once(&self) -> Result<DispatchResult, AppError> {
        // Freshly-fetched per cycle, never cached in long-lived state.
        let stop_list = StopList::load(&self.pool).await?;

        store::recover_stale(&self.pool, self.stale_claim_secs).await?;

        let Some(item) = store::dequeue_next(&self.pool, &stop_list).await? else {
            return Ok(DispatchResult::Idle);
        };

        let outcome = self.run_handler(&item).await;
        let failed = matches!(outcome, Outcome::Failed { .. });
        store::record_outcome(&self.pool, item.id, outcome).await?;

        if failed {
            Ok(DispatchResult::Failed(item.id))
        } else {
            Ok(DispatchResult::Succeeded(item.id))
        }
    }

    async fn run_handler(&self, item: &QueueItemRow) -> Outcome {
        let Some(item_type) = item.type_enum() else {
            return Outcome::Failed {
                details: format!("Corrupt item type '{}'", item.item_type),
                class: FailureClass::Terminal,
            };
        };

        let Some(handler) = self.handlers.get(&item_type) else {
            return Outcome::Failed {
                details: format!("No handler registered for type '{}'", item.item_type),
                class: FailureClass::Terminal,
            };
        };

        debug!("Dispatching {} item {}", item.item_type, item.id);
        match handler.handle(item).await {
            Ok(message) => Outcome::Success { message },
            Err(HandlerError::Skip(reason)) => Outcome::Skipped { reason },
            Err(e) => Outcome::Failed {
                details: e.to_string(),
                class: e.class(),
            },
        }
    }

    /// The worker loop: poll until shutdown. Long-running handler work blocks
    /// this task only; run it from `tokio::spawn`, never on a request path.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        info!(
            "Queue worker started (poll interval {}ms)",
            poll_interval.as_millis()
        );
        loop {
            match self.dispatch_once().await {
                Ok(DispatchResult::Idle) => tokio::time::sleep(poll_interval).await,
                Ok(result) => debug!("Dispatch cycle: {result:?}"),
                Err(e) => {
                    error!("Dispatch cycle failed: {e}");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;

    struct SkipAll;

    #[async_trait]
    impl QueueHandler for SkipAll {
        async fn handle(&self, _item: &QueueItemRow) -> Result<String, HandlerError> {
            Err(HandlerError::Skip("nothing to analyze".to_string()))
        }
    }

    fn item(item_type: &str) -> QueueItemRow {
        QueueItemRow {
            id: Uuid::new_v4(),
            item_type: item_type.to_string(),
            status: "processing".to_string(),
            url: "https://acme.dev".to_string(),
            company_name: None,
            company_id: None,
            source: "manual".to_string(),
            submitted_by: None,
            retry_count: 0,
            max_retries: 3,
            priority: 0,
            result_message: None,
            error_details: None,
            source_id: None,
            source_type: None,
            source_config: None,
            tier: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: None,
            completed_at: None,
        }
    }

    // Lazy pool: valid handle, no connection until a query runs.
    fn dispatcher() -> Dispatcher {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        Dispatcher::new(pool, 60)
    }

    #[tokio::test]
    async fn test_skip_settles_as_skipped_not_failed() {
        let d = dispatcher().register(QueueItemType::Company, Arc::new(SkipAll));
        let outcome = d.run_handler(&item("company")).await;
        match outcome {
            Outcome::Skipped { reason } => assert_eq!(reason, "nothing to analyze"),
            other => panic!("expected skipped outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unregistered_type_fails_terminally() {
        let d = dispatcher();
        let outcome = d.run_handler(&item("company")).await;
        match outcome {
            Outcome::Failed { class, .. } => assert_eq!(class, FailureClass::Terminal),
            other => panic!("expected failed outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_handler_error_classification() {
        assert_eq!(
            HandlerError::Transient("socket reset".into()).class(),
            FailureClass::Transient
        );
        assert_eq!(
            HandlerError::Terminal("url returned 410".into()).class(),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_handler_error_messages_carry_detail() {
        let err = HandlerError::Transient("timed out after 30s".into());
        assert!(err.to_string().contains("timed out"));
    }
}

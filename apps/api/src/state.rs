use std::sync::Arc;

use sqlx::PgPool;

use crate::agent::AgentProcessRunner;
use crate::artifacts::ArtifactStore;
use crate::queue::scoring::SourceScorer;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub artifacts: ArtifactStore,
    pub agent: AgentProcessRunner,
    /// Pluggable source scorer. Default: WeightedSourceScorer.
    pub scorer: Arc<dyn SourceScorer>,
}

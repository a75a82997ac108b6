pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::generation::handlers as generation;
use crate::queue::handlers as queue;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Queue API
        .route(
            "/api/v1/queue",
            post(queue::handle_submit).get(queue::handle_list),
        )
        .route(
            "/api/v1/queue/:id",
            get(queue::handle_get).delete(queue::handle_delete),
        )
        .route("/api/v1/queue/:id/retry", post(queue::handle_retry))
        .route("/api/v1/queue/:id/skip", post(queue::handle_skip))
        .route("/api/v1/sources", get(queue::handle_list_sources))
        .route(
            "/api/v1/sources/:id/rescore",
            post(queue::handle_rescore_source),
        )
        // Generation API
        .route(
            "/api/v1/generation",
            post(generation::handle_start).get(generation::handle_list),
        )
        .route(
            "/api/v1/generation/generate",
            post(generation::handle_generate),
        )
        .route(
            "/api/v1/generation/:id",
            get(generation::handle_get).delete(generation::handle_delete),
        )
        .route(
            "/api/v1/generation/:id/advance",
            post(generation::handle_advance),
        )
        .route(
            "/api/v1/generation/:id/artifacts/:artifact_type/:filename",
            get(generation::handle_get_artifact),
        )
        .with_state(state)
}

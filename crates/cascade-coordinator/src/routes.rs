//! API route definitions.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, stages, workers};
use crate::state::AppState;

/// Create the coordinator router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workers", post(workers::register))
        .route("/workers/heartbeat", post(workers::heartbeat))
        .route("/stages/dispatch", post(stages::dispatch))
        .route("/stages/{index}", get(stages::get_stage))
        .route("/stages/{index}/started", post(stages::stage_started))
        .route("/stages/{index}/finished", post(stages::stage_finished))
        .route("/stages/{index}/failed", post(stages::stage_failed))
        .route("/stages/{index}/requeue", post(stages::stage_requeue))
        .route("/loop", get(stages::loop_status))
}

//! Worker registration and heartbeat handlers.

use axum::{Json, extract::State, http::StatusCode};
use cascade_core::protocol::{HeartbeatRequest, RegisterRequest, RegisterResponse};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    let mut clients = state.clients.lock().await;
    clients.insert(req.worker_uri.clone(), Utc::now());
    info!(worker = %req.worker_uri, total = clients.len(), "Client registered");
    Json(RegisterResponse {
        registered: clients.len(),
    })
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> StatusCode {
    let mut clients = state.clients.lock().await;
    if !clients.contains_key(&req.worker_uri) {
        warn!(worker = %req.worker_uri, "Heartbeat from unregistered worker");
    }
    clients.insert(req.worker_uri.clone(), Utc::now());
    debug!(
        worker = %req.worker_uri,
        running = ?req.running,
        cpu_percent = req.cpu_percent,
        "Heartbeat"
    );
    StatusCode::OK
}

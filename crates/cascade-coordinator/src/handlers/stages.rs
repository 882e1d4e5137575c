//! Stage dispatch and outcome handlers.
//!
//! Each handler takes the scheduler mutex once, performs exactly one
//! scheduler operation, and releases it: workers never observe state in
//! an intermediate form.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use cascade_core::Error;
use cascade_core::protocol::{DispatchResponse, LoopResponse, StageDescriptor, StartedRequest};
use std::sync::Arc;

use crate::state::AppState;

fn error_response(e: Error) -> (StatusCode, String) {
    let status = match e {
        Error::StageNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

pub async fn dispatch(State(state): State<Arc<AppState>>) -> Json<DispatchResponse> {
    if state.is_shutdown() {
        return Json(DispatchResponse::Shutdown);
    }
    let mut scheduler = state.scheduler.lock().await;
    match scheduler.get_runnable_stage_index() {
        Some(index) => Json(DispatchResponse::Stage { index }),
        None => Json(DispatchResponse::Idle),
    }
}

pub async fn get_stage(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<StageDescriptor>, (StatusCode, String)> {
    let scheduler = state.scheduler.lock().await;
    scheduler
        .descriptor(index)
        .map(Json)
        .map_err(error_response)
}

pub async fn stage_started(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Json(req): Json<StartedRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let scheduler = state.scheduler.lock().await;
    scheduler
        .set_stage_started(index, &req.worker_uri)
        .map(|_| StatusCode::OK)
        .map_err(error_response)
}

pub async fn stage_finished(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut scheduler = state.scheduler.lock().await;
    scheduler
        .set_stage_finished(index, true)
        .map_err(error_response)?;
    if !scheduler.continue_loop() {
        state.latch_shutdown();
    }
    Ok(StatusCode::OK)
}

pub async fn stage_failed(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut scheduler = state.scheduler.lock().await;
    scheduler
        .set_stage_failed(index)
        .map_err(error_response)?;
    if !scheduler.continue_loop() {
        state.latch_shutdown();
    }
    Ok(StatusCode::OK)
}

pub async fn stage_requeue(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut scheduler = state.scheduler.lock().await;
    scheduler
        .requeue(index)
        .map(|_| StatusCode::OK)
        .map_err(error_response)
}

pub async fn loop_status(State(state): State<Arc<AppState>>) -> Json<LoopResponse> {
    if state.is_shutdown() {
        return Json(LoopResponse { active: false });
    }
    let scheduler = state.scheduler.lock().await;
    let active = scheduler.continue_loop();
    if !active {
        state.latch_shutdown();
    }
    Json(LoopResponse { active })
}

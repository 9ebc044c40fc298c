//! REST endpoints for health and bridge observability

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

use crate::core::bridge::BridgeSnapshot;
use crate::state::AppState;

/// Liveness probe
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// List every registered bridge
pub async fn list_bridges(State(state): State<Arc<AppState>>) -> Json<Vec<BridgeSnapshot>> {
    Json(state.registry.snapshots())
}

/// Inspect one bridge by call id
pub async fn get_bridge(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<BridgeSnapshot>, StatusCode> {
    state
        .registry
        .get(&call_id)
        .map(|handle| Json(handle.snapshot()))
        .ok_or(StatusCode::NOT_FOUND)
}

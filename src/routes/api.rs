use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST API router
///
/// # Endpoints
///
/// `GET /api/v1/bridges` - snapshots of every registered bridge
/// `GET /api/v1/bridges/{call_id}` - one bridge by call id
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/bridges", get(api::list_bridges))
        .route("/api/v1/bridges/{call_id}", get(api::get_bridge))
        .layer(TraceLayer::new_for_http())
}

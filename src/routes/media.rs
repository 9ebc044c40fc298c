//! Media WebSocket route configuration
//!
//! Configures the WebSocket endpoints that carry call audio: the telephony
//! media stream and the browser playground.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{playground_handler, telephony_media_handler};
use crate::state::AppState;
use std::sync::Arc;

/// Create the media WebSocket router
///
/// # Endpoints
///
/// `GET /media` - WebSocket upgrade for the telephony media stream.
/// Query parameters: `business_id` (required), plus optional `agent_type`,
/// `customer_id`, `call_id`, `stream_id`, and `direction`; URL values take
/// precedence over the start event's.
///
/// `GET /playground` - WebSocket upgrade for the browser console. The first
/// frame must be a `config` event carrying the agent settings; the session
/// then follows the media-stream protocol.
///
/// # Protocol
///
/// After the `start` event the client sends `media` frames of base64 mu-law
/// audio and receives `media`, `mark`, and `clear` frames back.
///
/// # Example
///
/// ```json
/// // Telephony side sends
/// {"event": "start", "streamSid": "MZ...", "callSid": "CA...", "customParameters": {}}
/// {"event": "media", "track": "inbound", "chunk": 1, "timestamp": 20, "payload": "..."}
///
/// // Bridge sends back
/// {"event": "media", "streamSid": "MZ...", "media": {"payload": "..."}}
/// {"event": "mark", "streamSid": "MZ...", "mark": {"name": "turn-1"}}
/// ```
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media", get(telephony_media_handler))
        .route("/playground", get(playground_handler))
        .layer(TraceLayer::new_for_http())
}

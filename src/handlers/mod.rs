//! HTTP and WebSocket request handlers
//!
//! This module organizes all handlers into logical groups:
//! - `api` - health check and bridge observability endpoints
//! - `gateway` - admission checks shared by the WebSocket entry points
//! - `playground` - browser console WebSocket
//! - `telephony` - telephony media-stream WebSocket

pub mod api;
pub mod gateway;
pub mod playground;
pub mod telephony;

// Re-export commonly used handlers for convenient access
pub use playground::playground_handler;
pub use telephony::telephony_media_handler;

//! Route configuration
//!
//! - `api` - REST endpoints for bridge observability
//! - `media` - WebSocket endpoints for telephony and the playground

pub mod api;
pub mod media;

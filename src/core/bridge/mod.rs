//! Bridge core.
//!
//! One bridge per live call: session state and the relay loop in
//! [`bridge`], the per-call bookkeeping types in [`session`], and the
//! process-wide map of running bridges in [`registry`].

pub mod bridge;
pub mod registry;
pub mod session;

pub use bridge::{
    BridgeConfig, BridgeError, BridgeEvent, BridgeHandle, BridgeResult, BridgeSnapshot,
    DisconnectReason, RealtimeBridge,
};
pub use registry::BridgeRegistry;
pub use session::{
    AudioFrameBuffer, BridgeMetrics, BridgeState, CallDirection, MetricsSnapshot, SequenceGap,
    SequenceTracker, Session,
};

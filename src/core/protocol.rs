//! Shared protocol decode error type.
//!
//! Both wire protocols decode into closed tagged unions; a frame whose
//! discriminant is not in the union, or whose body does not match the
//! variant's shape, is a protocol error. The bridge drops the single
//! offending frame, counts it, and keeps the session alive.

use thiserror::Error;

/// Errors produced while decoding either wire protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame was not valid JSON or lacked the discriminant field.
    #[error("malformed protocol frame: {0}")]
    Malformed(String),

    /// The discriminant named an event kind outside the closed union.
    #[error("unknown {protocol} event kind: {kind}")]
    UnknownEventKind { protocol: &'static str, kind: String },

    /// The discriminant was known but the body did not match its shape.
    #[error("invalid {kind} event body: {detail}")]
    InvalidEventBody { kind: String, detail: String },

    /// A base64 audio payload failed to decode.
    #[error("invalid base64 audio payload: {0}")]
    InvalidAudioPayload(String),
}

/// Result alias for protocol decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

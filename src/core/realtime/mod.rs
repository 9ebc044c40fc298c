//! AI realtime transport.
//!
//! Wire protocol types and the WebSocket client for the AI realtime
//! service. One connection carries one call: caller audio and control
//! events go out as [`ClientEvent`]s, agent audio, transcripts and tool
//! invocations come back as [`ServerEvent`]s.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, mono, base64 encoded, in both
//! directions. Conversion from the telephony leg's format lives in
//! [`crate::core::audio`].

pub mod client;
pub mod messages;

pub use client::{
    AiClientConfig, AiRealtimeClient, AiTransportEvent, DEFAULT_AI_MODEL, DEFAULT_AI_REALTIME_URL,
    TransportError, TransportResult,
};
pub use messages::{
    AiSessionConfig, ApiError, ClientEvent, ConversationItem, InputAudioTranscription,
    ResponseInfo, ResponseOptions, ServerEvent, ToolDefinition, TurnDetection, decode_ai_event,
};

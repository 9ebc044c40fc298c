//! Telephony media-stream protocol.
//!
//! JSON text frames over the inbound call WebSocket: call lifecycle events
//! (`connected`, `start`, `stop`), media frames carrying base64 mu-law audio,
//! playback checkpoints (`mark`) and buffer flushes (`clear`). The bridge
//! emits `media`, `clear` and `mark` messages back over the same socket.

mod messages;

pub use messages::{
    MarkInfo, MediaFrame, MediaTrack, OutboundMedia, TelephonyEvent, TelephonyOutbound,
    decode_telephony_event,
};

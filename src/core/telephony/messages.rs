//! Telephony media-stream message types.
//!
//! Tagged unions for the JSON frames exchanged with the telephony media
//! socket. Inbound frames are decoded through [`decode_telephony_event`],
//! which classifies unknown discriminants as protocol errors instead of
//! silently dropping them. Outbound frames are built through the
//! [`TelephonyOutbound`] constructors so every message carries the stream id
//! the transport requires.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::audio::AudioFormat;
use crate::core::protocol::{ProtocolError, ProtocolResult};

// ============================================================================
// Inbound events (telephony -> bridge)
// ============================================================================

/// Event kinds the telephony transport sends to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// Socket-level handshake confirmation, sent before `start`.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Call media is about to flow; carries the call and stream identifiers.
    #[serde(rename_all = "camelCase")]
    Start {
        stream_sid: String,
        call_sid: String,
        #[serde(default)]
        custom_parameters: HashMap<String, String>,
    },

    /// One audio frame. `chunk` is the per-track sequence counter and
    /// `payload` is base64 mu-law audio.
    Media {
        track: MediaTrack,
        chunk: u64,
        timestamp: u64,
        payload: String,
    },

    /// The call ended on the telephony side.
    #[serde(rename_all = "camelCase")]
    Stop { call_sid: String },

    /// Echo of a playback checkpoint previously sent by the bridge.
    Mark { mark: MarkInfo },

    /// The telephony side flushed its buffers; the bridge must do the same.
    Clear,
}

/// Discriminants of the closed inbound union.
const KNOWN_TELEPHONY_EVENTS: &[&str] = &["connected", "start", "media", "stop", "mark", "clear"];

impl TelephonyEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TelephonyEvent::Connected { .. } => "connected",
            TelephonyEvent::Start { .. } => "start",
            TelephonyEvent::Media { .. } => "media",
            TelephonyEvent::Stop { .. } => "stop",
            TelephonyEvent::Mark { .. } => "mark",
            TelephonyEvent::Clear => "clear",
        }
    }

    /// Turn a `media` event into its decoded [`MediaFrame`]. Returns `None`
    /// for other kinds.
    pub fn into_frame(self) -> Option<ProtocolResult<MediaFrame>> {
        match self {
            TelephonyEvent::Media {
                track,
                chunk,
                timestamp,
                payload,
            } => Some(
                BASE64
                    .decode(payload)
                    .map(|audio| MediaFrame {
                        track,
                        sequence: chunk,
                        timestamp,
                        payload: Bytes::from(audio),
                        format: AudioFormat::MulawPcm8k,
                    })
                    .map_err(|e| ProtocolError::InvalidAudioPayload(e.to_string())),
            ),
            _ => None,
        }
    }
}

/// Decode one inbound telephony frame.
///
/// A frame without valid JSON or without the `event` discriminant is
/// [`ProtocolError::Malformed`]; a discriminant outside the closed union is
/// [`ProtocolError::UnknownEventKind`]; a known kind whose body does not match
/// is [`ProtocolError::InvalidEventBody`].
pub fn decode_telephony_event(text: &str) -> ProtocolResult<TelephonyEvent> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProtocolError::Malformed("missing `event` discriminant".to_string()))?
        .to_string();

    if !KNOWN_TELEPHONY_EVENTS.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownEventKind {
            protocol: "telephony",
            kind,
        });
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidEventBody {
        kind,
        detail: e.to_string(),
    })
}

// ============================================================================
// Shared frame pieces
// ============================================================================

/// Direction label on a media frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaTrack {
    Inbound,
    Outbound,
    Both,
}

impl fmt::Display for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaTrack::Inbound => write!(f, "inbound"),
            MediaTrack::Outbound => write!(f, "outbound"),
            MediaTrack::Both => write!(f, "both"),
        }
    }
}

/// One inbound audio frame after payload decoding, ready for conversion.
/// Transient: a frame lives exactly as long as the relay step carrying it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub track: MediaTrack,
    /// Per-track sequence counter (the wire's `chunk`)
    pub sequence: u64,
    pub timestamp: u64,
    /// Raw audio bytes
    pub payload: Bytes,
    /// Codec of `payload`
    pub format: AudioFormat,
}

/// Named playback checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkInfo {
    pub name: String,
}

/// Base64 audio body of an outbound media message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMedia {
    pub payload: String,
}

// ============================================================================
// Outbound messages (bridge -> telephony)
// ============================================================================

/// Messages the bridge emits to the telephony transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    #[serde(rename_all = "camelCase")]
    Media {
        stream_sid: String,
        media: OutboundMedia,
    },
    #[serde(rename_all = "camelCase")]
    Clear { stream_sid: String },
    #[serde(rename_all = "camelCase")]
    Mark { stream_sid: String, mark: MarkInfo },
}

impl TelephonyOutbound {
    /// Build an outbound audio message from raw mu-law bytes.
    pub fn media(stream_sid: impl Into<String>, audio: &[u8]) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: BASE64.encode(audio),
            },
        }
    }

    /// Build a playback flush message.
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        TelephonyOutbound::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    /// Build a playback checkpoint message.
    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        TelephonyOutbound::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkInfo { name: name.into() },
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_connected() {
        let event =
            decode_telephony_event(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#)
                .unwrap();
        assert_eq!(
            event,
            TelephonyEvent::Connected {
                protocol: Some("Call".to_string()),
                version: Some("1.0.0".to_string()),
            }
        );
    }

    #[test]
    fn test_decode_start_with_custom_parameters() {
        let json = r#"{
            "event": "start",
            "streamSid": "MZ1234",
            "callSid": "CA5678",
            "customParameters": {"agent_type": "reception"}
        }"#;
        match decode_telephony_event(json).unwrap() {
            TelephonyEvent::Start {
                stream_sid,
                call_sid,
                custom_parameters,
            } => {
                assert_eq!(stream_sid, "MZ1234");
                assert_eq!(call_sid, "CA5678");
                assert_eq!(
                    custom_parameters.get("agent_type"),
                    Some(&"reception".to_string())
                );
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_start_without_custom_parameters() {
        let json = r#"{"event":"start","streamSid":"MZ1","callSid":"CA1"}"#;
        match decode_telephony_event(json).unwrap() {
            TelephonyEvent::Start {
                custom_parameters, ..
            } => assert!(custom_parameters.is_empty()),
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_media_into_frame() {
        let audio = [0x7Fu8, 0xFF, 0x00, 0x80];
        let json = format!(
            r#"{{"event":"media","track":"inbound","chunk":3,"timestamp":60,"payload":"{}"}}"#,
            BASE64.encode(audio)
        );
        let event = decode_telephony_event(&json).unwrap();
        let frame = event.into_frame().unwrap().unwrap();
        assert_eq!(frame.track, MediaTrack::Inbound);
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.timestamp, 60);
        assert_eq!(frame.payload.as_ref(), audio);
        assert_eq!(frame.format, AudioFormat::MulawPcm8k);
    }

    #[test]
    fn test_media_with_bad_base64_is_not_a_frame() {
        let json = r#"{"event":"media","track":"inbound","chunk":1,"timestamp":0,"payload":"%%%"}"#;
        let event = decode_telephony_event(json).unwrap();
        assert!(matches!(
            event.into_frame(),
            Some(Err(ProtocolError::InvalidAudioPayload(_)))
        ));
        assert!(
            decode_telephony_event(r#"{"event":"stop","callSid":"CA9"}"#)
                .unwrap()
                .into_frame()
                .is_none()
        );
    }

    #[test]
    fn test_decode_stop_mark_clear() {
        assert_eq!(
            decode_telephony_event(r#"{"event":"stop","callSid":"CA9"}"#).unwrap(),
            TelephonyEvent::Stop {
                call_sid: "CA9".to_string()
            }
        );
        assert_eq!(
            decode_telephony_event(r#"{"event":"mark","mark":{"name":"turn-1"}}"#).unwrap(),
            TelephonyEvent::Mark {
                mark: MarkInfo {
                    name: "turn-1".to_string()
                }
            }
        );
        assert_eq!(
            decode_telephony_event(r#"{"event":"clear"}"#).unwrap(),
            TelephonyEvent::Clear
        );
    }

    #[test]
    fn test_unknown_event_kind_is_a_protocol_error() {
        let err = decode_telephony_event(r#"{"event":"dtmf","digit":"5"}"#).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownEventKind {
                protocol: "telephony",
                kind: "dtmf".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_frame() {
        assert!(matches!(
            decode_telephony_event("not json at all"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_telephony_event(r#"{"no_event_field":true}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_known_kind_with_invalid_body() {
        let err = decode_telephony_event(r#"{"event":"start","streamSid":"MZ1"}"#).unwrap_err();
        match err {
            ProtocolError::InvalidEventBody { kind, .. } => assert_eq!(kind, "start"),
            other => panic!("expected InvalidEventBody, got {:?}", other),
        }
    }

    #[test]
    fn test_outbound_media_shape() {
        let msg = TelephonyOutbound::media("MZ1", &[1, 2, 3]);
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ1");
        assert_eq!(json["media"]["payload"], BASE64.encode([1, 2, 3]));
    }

    #[test]
    fn test_outbound_clear_and_mark_shape() {
        let clear: serde_json::Value =
            serde_json::from_str(&TelephonyOutbound::clear("MZ2").to_json().unwrap()).unwrap();
        assert_eq!(clear["event"], "clear");
        assert_eq!(clear["streamSid"], "MZ2");

        let mark: serde_json::Value =
            serde_json::from_str(&TelephonyOutbound::mark("MZ2", "turn-7").to_json().unwrap())
                .unwrap();
        assert_eq!(mark["event"], "mark");
        assert_eq!(mark["mark"]["name"], "turn-7");
    }

    #[test]
    fn test_media_track_display() {
        assert_eq!(MediaTrack::Inbound.to_string(), "inbound");
        assert_eq!(MediaTrack::Both.to_string(), "both");
    }
}

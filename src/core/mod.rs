pub mod audio;
pub mod bridge;
pub mod dispatch;
pub mod protocol;
pub mod realtime;
pub mod telephony;

// Re-export commonly used types for convenience
pub use audio::{AudioCodecAdapter, AudioFormat, CodecError, CodecResult};

pub use bridge::{
    BridgeConfig, BridgeHandle, BridgeRegistry, BridgeState, DisconnectReason, RealtimeBridge,
    Session,
};

pub use dispatch::{
    ActionHandler, DispatchError, FunctionCallDispatcher, FunctionCallRequest, FunctionCallResult,
};

pub use protocol::{ProtocolError, ProtocolResult};

pub use realtime::{AiClientConfig, AiRealtimeClient, ServerEvent, TransportError};

pub use telephony::{TelephonyEvent, TelephonyOutbound, decode_telephony_event};

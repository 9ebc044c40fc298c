//! Audio codec conversion between the telephony and AI transports.
//!
//! The telephony side carries 8kHz G.711 mu-law companded audio; the AI side
//! speaks 16-bit linear PCM at 24kHz. Everything in this module is stateless
//! so a single adapter can serve every concurrent bridge without locking.

mod codec;

pub use codec::{
    AI_SAMPLE_RATE, AudioCodecAdapter, AudioFormat, CodecError, CodecResult,
    TELEPHONY_FRAME_SAMPLES, TELEPHONY_SAMPLE_RATE,
};

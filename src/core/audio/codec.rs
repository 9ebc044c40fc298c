//! Stateless audio codec adapter.
//!
//! Converts between the telephony transport's narrowband format (G.711 mu-law
//! at 8kHz) and the AI transport's linear format (PCM16 little-endian at
//! 24kHz), operating on already-chunked streaming frames. No state is kept
//! between calls, so the adapter is shared freely across concurrent bridges.
//!
//! # Conversion pipeline
//!
//! - Telephony -> AI: mu-law decode to PCM16 at 8kHz, then upsample to 24kHz.
//! - AI -> Telephony: downsample PCM16 from 24kHz to 8kHz, then mu-law encode.
//!
//! Sample-rate conversion uses linear interpolation. The 1:3 ratio between the
//! two rates keeps interpolation artifacts well below mu-law quantization
//! noise for speech.

use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Sample rate of the telephony media stream (G.711).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Sample rate the AI transport is configured for (PCM16).
pub const AI_SAMPLE_RATE: u32 = 24000;

/// Samples per 20ms telephony media frame at 8kHz.
pub const TELEPHONY_FRAME_SAMPLES: usize = 160;

/// Bias added before mu-law segment search (G.711).
const MULAW_BIAS: i32 = 0x84;

/// Largest magnitude representable after biasing (G.711).
const MULAW_CLIP: i32 = 32635;

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by audio conversion.
///
/// The bridge drops the offending frame and increments its error metric; a
/// codec failure never terminates a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// PCM16 byte payload had an odd length and cannot form whole samples.
    #[error("truncated PCM16 payload: {0} bytes is not sample-aligned")]
    TruncatedPcm(usize),

    /// A frame exceeded the maximum size the adapter will process.
    #[error("oversized audio frame: {got} bytes exceeds limit of {limit}")]
    OversizedFrame { got: usize, limit: usize },
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Upper bound for a single frame fed to the adapter. Telephony frames are
/// 160 bytes and AI deltas arrive in chunks well under this; anything larger
/// indicates a corrupt length prefix or a hostile payload.
const MAX_FRAME_BYTES: usize = 1 << 20;

// ============================================================================
// Formats
// ============================================================================

/// Wire formats the adapter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// G.711 mu-law companded, 8kHz, one byte per sample.
    MulawPcm8k,
    /// Signed 16-bit little-endian linear PCM at 24kHz.
    LinearPcm24k,
}

impl AudioFormat {
    /// Native sample rate of this format.
    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioFormat::MulawPcm8k => TELEPHONY_SAMPLE_RATE,
            AudioFormat::LinearPcm24k => AI_SAMPLE_RATE,
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Stateless codec conversion entry points.
///
/// All methods are associated functions; the unit struct exists so call sites
/// read as `AudioCodecAdapter::decode_to_pcm(...)` and the adapter can grow
/// configuration later without changing signatures at every caller.
pub struct AudioCodecAdapter;

impl AudioCodecAdapter {
    /// Decode a wire-format frame into the common representation: PCM16
    /// samples at the AI transport's 24kHz rate.
    pub fn decode_to_pcm(bytes: &[u8], source: AudioFormat) -> CodecResult<Vec<i16>> {
        check_frame_size(bytes)?;
        match source {
            AudioFormat::MulawPcm8k => {
                let pcm8k: Vec<i16> = bytes.iter().map(|&b| mulaw_to_linear(b)).collect();
                Ok(resample(&pcm8k, TELEPHONY_SAMPLE_RATE, AI_SAMPLE_RATE))
            }
            AudioFormat::LinearPcm24k => parse_pcm16_le(bytes),
        }
    }

    /// Encode common-representation PCM (24kHz) into a wire-format frame.
    pub fn encode_from_pcm(pcm: &[i16], target: AudioFormat) -> CodecResult<Vec<u8>> {
        match target {
            AudioFormat::MulawPcm8k => {
                let pcm8k = resample(pcm, AI_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE);
                Ok(pcm8k.iter().map(|&s| linear_to_mulaw(s)).collect())
            }
            AudioFormat::LinearPcm24k => {
                let mut out = Vec::with_capacity(pcm.len() * 2);
                for sample in pcm {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
                Ok(out)
            }
        }
    }

    /// Convert a frame directly between two wire formats.
    pub fn convert(bytes: &[u8], source: AudioFormat, target: AudioFormat) -> CodecResult<Vec<u8>> {
        if source == target {
            check_frame_size(bytes)?;
            return Ok(bytes.to_vec());
        }
        let pcm = Self::decode_to_pcm(bytes, source)?;
        Self::encode_from_pcm(&pcm, target)
    }
}

fn check_frame_size(bytes: &[u8]) -> CodecResult<()> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::OversizedFrame {
            got: bytes.len(),
            limit: MAX_FRAME_BYTES,
        });
    }
    Ok(())
}

fn parse_pcm16_le(bytes: &[u8]) -> CodecResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::TruncatedPcm(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

// ============================================================================
// G.711 mu-law sample math
// ============================================================================

/// Encode one linear PCM16 sample as a G.711 mu-law byte.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut linear = sample as i32;

    // Extract sign bit and take the magnitude
    let sign: i32 = if linear < 0 {
        linear = -linear;
        0x80
    } else {
        0x00
    };

    if linear > MULAW_CLIP {
        linear = MULAW_CLIP;
    }

    // Bias shifts the magnitude so segment boundaries land on powers of two
    linear += MULAW_BIAS;

    // Find the exponent (segment)
    let mut exponent = 7;
    for i in 0..8 {
        if linear <= (0xFF << i) {
            exponent = i;
            break;
        }
    }

    let mantissa = (linear >> (exponent + 3)) & 0x0F;

    // mu-law transmits the complement
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode one G.711 mu-law byte to a linear PCM16 sample.
pub fn mulaw_to_linear(mulaw: u8) -> i16 {
    // Wire bytes are complemented; undo that first
    let mulaw = !mulaw as i32;
    let exponent = (mulaw >> 4) & 0x07;
    let mantissa = mulaw & 0x0F;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;

    if (mulaw & 0x80) != 0 {
        (-magnitude) as i16
    } else {
        magnitude as i16
    }
}

// ============================================================================
// Sample-rate conversion
// ============================================================================

/// Resample PCM16 audio between rates using linear interpolation.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio).round() as usize;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let idx0 = idx0.min(samples.len() - 1);
        let frac = src_idx - idx0 as f64;

        let sample = samples[idx0] as f64 * (1.0 - frac) + samples[idx1] as f64 * frac;
        resampled.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }
    resampled
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_silence_roundtrip() {
        let encoded = linear_to_mulaw(0);
        let decoded = mulaw_to_linear(encoded);
        assert!(decoded.abs() <= 8, "silence decoded to {}", decoded);
    }

    #[test]
    fn test_mulaw_roundtrip_tolerance() {
        // mu-law is lossy; error stays within the segment quantization step,
        // which grows with magnitude
        for &sample in &[0i16, 100, -100, 1000, -1000, 8000, -8000, 30000, -30000] {
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            let tolerance = (sample.abs() as i32 / 16).max(16);
            assert!(
                ((decoded as i32) - (sample as i32)).abs() <= tolerance,
                "sample {} decoded to {} (tolerance {})",
                sample,
                decoded,
                tolerance
            );
        }
    }

    #[test]
    fn test_mulaw_extremes_do_not_panic() {
        for &sample in &[i16::MIN, i16::MAX, -MULAW_CLIP as i16, MULAW_CLIP as i16] {
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            assert!(decoded.abs() as i32 <= MULAW_CLIP);
        }
    }

    #[test]
    fn test_mulaw_sign_preserved() {
        assert!(mulaw_to_linear(linear_to_mulaw(12345)) > 0);
        assert!(mulaw_to_linear(linear_to_mulaw(-12345)) < 0);
    }

    #[test]
    fn test_decode_mulaw_upsamples_to_ai_rate() {
        let frame = vec![0xFFu8; TELEPHONY_FRAME_SAMPLES];
        let pcm = AudioCodecAdapter::decode_to_pcm(&frame, AudioFormat::MulawPcm8k).unwrap();
        // 160 samples at 8kHz become 480 at 24kHz
        assert_eq!(pcm.len(), TELEPHONY_FRAME_SAMPLES * 3);
    }

    #[test]
    fn test_encode_to_mulaw_downsamples_from_ai_rate() {
        let pcm = vec![0i16; TELEPHONY_FRAME_SAMPLES * 3];
        let bytes = AudioCodecAdapter::encode_from_pcm(&pcm, AudioFormat::MulawPcm8k).unwrap();
        assert_eq!(bytes.len(), TELEPHONY_FRAME_SAMPLES);
    }

    #[test]
    fn test_pcm16_le_roundtrip() {
        let pcm = vec![0i16, 1, -1, 32767, -32768, 12345];
        let bytes = AudioCodecAdapter::encode_from_pcm(&pcm, AudioFormat::LinearPcm24k).unwrap();
        let back = AudioCodecAdapter::decode_to_pcm(&bytes, AudioFormat::LinearPcm24k).unwrap();
        assert_eq!(pcm, back);
    }

    #[test]
    fn test_odd_length_pcm_is_rejected() {
        let err = AudioCodecAdapter::decode_to_pcm(&[0u8; 3], AudioFormat::LinearPcm24k)
            .unwrap_err();
        assert_eq!(err, CodecError::TruncatedPcm(3));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let huge = vec![0u8; MAX_FRAME_BYTES + 1];
        let err = AudioCodecAdapter::decode_to_pcm(&huge, AudioFormat::MulawPcm8k).unwrap_err();
        assert!(matches!(err, CodecError::OversizedFrame { .. }));
    }

    #[test]
    fn test_empty_frame_converts_to_empty() {
        let out =
            AudioCodecAdapter::convert(&[], AudioFormat::MulawPcm8k, AudioFormat::LinearPcm24k)
                .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_full_telephony_to_ai_to_telephony_cycle() {
        // A 440Hz-ish ramp survives the lossy cycle with speech-grade fidelity
        let frame: Vec<u8> = (0..TELEPHONY_FRAME_SAMPLES)
            .map(|i| linear_to_mulaw(((i as i32 * 64) % 8000) as i16))
            .collect();
        let ai = AudioCodecAdapter::convert(
            &frame,
            AudioFormat::MulawPcm8k,
            AudioFormat::LinearPcm24k,
        )
        .unwrap();
        assert_eq!(ai.len(), TELEPHONY_FRAME_SAMPLES * 3 * 2);

        let back = AudioCodecAdapter::convert(
            &ai,
            AudioFormat::LinearPcm24k,
            AudioFormat::MulawPcm8k,
        )
        .unwrap();
        assert_eq!(back.len(), TELEPHONY_FRAME_SAMPLES);
    }

    #[test]
    fn test_resample_identity_when_rates_match() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(resample(&samples, 8000, 8000), samples);
    }

    #[test]
    fn test_resample_ratio() {
        let samples = vec![0i16; 800];
        assert_eq!(resample(&samples, 8000, 24000).len(), 2400);
        assert_eq!(resample(&samples, 24000, 8000).len(), 267);
    }
}

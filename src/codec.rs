//! Base64 → 16-bit PCM → normalized float decoding.
//!
//! The speech service returns raw interleaved `S16LE` PCM wrapped in base64.
//! The stream carries no header, so the sample rate and channel count are
//! agreed out-of-band and passed in as a [`PcmFormat`].

use base64::Engine as _;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use thiserror::Error;

/// Bytes per 16-bit sample.
const BYTES_PER_SAMPLE: usize = 2;

/// Divisor mapping `i16` onto `[-1.0, 1.0)`.
const I16_SCALE: f32 = 32768.0;

/// Standard alphabet, padding accepted but not required, non-zero
/// trailing bits in the last symbol ignored.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input is not valid base64 text.
    #[error("malformed base64 audio: {0}")]
    MalformedBase64(String),

    /// Sample rate or channel count is zero.
    #[error("invalid PCM format: {sample_rate} Hz, {channels} channel(s)")]
    InvalidFormat { sample_rate: u32, channels: u16 },
}

/// Out-of-band description of a raw PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    /// Bytes in one interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        BYTES_PER_SAMPLE * self.channels as usize
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(DecodeError::InvalidFormat {
                sample_rate: self.sample_rate,
                channels: self.channels,
            });
        }
        Ok(())
    }
}

/// Per-channel normalized samples plus the format they were decoded with.
///
/// Immutable once built; every channel has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedAudioBuffer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Re-interleave into `frame0-ch0, frame0-ch1, ...` order.
    pub fn interleaved(&self) -> Vec<f32> {
        let channels = self.channels.len();
        let mut out = vec![0.0f32; self.frame_count() * channels];
        for (c, data) in self.channels.iter().enumerate() {
            for (i, &s) in data.iter().enumerate() {
                out[i * channels + c] = s;
            }
        }
        out
    }
}

/// Decode base64 text into the exact bytes it encodes.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| DecodeError::MalformedBase64(e.to_string()))
}

/// Interpret raw bytes as interleaved little-endian `i16` PCM.
///
/// `frame_count = (len / 2) / channels`. A trailing partial frame (or odd
/// byte) is dropped rather than reported; callers relying on exact lengths
/// should check `bytes.len() % format.frame_bytes()` themselves.
pub fn interpret_pcm16(bytes: &[u8], format: PcmFormat) -> Result<DecodedAudioBuffer, DecodeError> {
    format.validate()?;

    let num_channels = format.channels as usize;
    let total_samples = bytes.len() / BYTES_PER_SAMPLE;
    let frame_count = total_samples / num_channels;

    let mut channels: Vec<Vec<f32>> = (0..num_channels)
        .map(|_| Vec::with_capacity(frame_count))
        .collect();

    for (c, data) in channels.iter_mut().enumerate() {
        for i in 0..frame_count {
            let offset = (i * num_channels + c) * BYTES_PER_SAMPLE;
            let sample = i16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
            data.push(sample as f32 / I16_SCALE);
        }
    }

    Ok(DecodedAudioBuffer {
        sample_rate: format.sample_rate,
        channels,
    })
}

/// Base64 text straight to a playable buffer.
pub fn decode_audio(encoded: &str, format: PcmFormat) -> Result<DecodedAudioBuffer, DecodeError> {
    let bytes = decode_base64(encoded)?;
    log::debug!(
        "Decoded {} PCM bytes ({} Hz, {} ch)",
        bytes.len(),
        format.sample_rate,
        format.channels
    );
    interpret_pcm16(&bytes, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    const MONO_24K: PcmFormat = PcmFormat { sample_rate: 24000, channels: 1 };
    const STEREO_24K: PcmFormat = PcmFormat { sample_rate: 24000, channels: 2 };

    fn pseudo_random_bytes(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_known_vector_mono() {
        let buffer = decode_audio("AAB/AA==", MONO_24K).unwrap();
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[0.0, 0.003875732421875]);
    }

    #[test]
    fn test_padding_optional() {
        assert_eq!(decode_base64("AAB/AA").unwrap(), vec![0x00, 0x00, 0x7F, 0x00]);
        assert_eq!(decode_base64("AAB/AA==").unwrap(), vec![0x00, 0x00, 0x7F, 0x00]);
    }

    #[test]
    fn test_trailing_bits_ignored() {
        // 'B' leaves a set bit below the last whole byte
        assert_eq!(decode_base64("AB==").unwrap(), vec![0x00]);
        assert_eq!(decode_base64("AB").unwrap(), vec![0x00]);
        assert_eq!(decode_base64("AAB/AB==").unwrap(), vec![0x00, 0x00, 0x7F, 0x00]);
    }

    #[test]
    fn test_malformed_base64() {
        let err = decode_base64("@@@@").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedBase64(_)));
        assert!(matches!(decode_audio("@@@@", MONO_24K), Err(DecodeError::MalformedBase64(_))));
    }

    #[test]
    fn test_base64_round_trip() {
        for len in [0, 1, 2, 3, 17, 256] {
            let bytes = pseudo_random_bytes(len);
            let encoded = STANDARD.encode(&bytes);
            assert_eq!(decode_base64(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_mono_samples_match_le_words() {
        let bytes = pseudo_random_bytes(64);
        let buffer = interpret_pcm16(&bytes, MONO_24K).unwrap();
        let ch = buffer.channel(0).unwrap();
        assert_eq!(ch.len(), 32);
        for (i, &s) in ch.iter().enumerate() {
            let expected = i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]) as f32 / 32768.0;
            assert_eq!(s, expected);
        }
    }

    #[test]
    fn test_stereo_deinterleave() {
        let bytes = pseudo_random_bytes(80);
        let buffer = interpret_pcm16(&bytes, STEREO_24K).unwrap();
        assert_eq!(buffer.frame_count(), 20);
        for c in 0..2 {
            let ch = buffer.channel(c).unwrap();
            for (i, &s) in ch.iter().enumerate() {
                let at = 4 * i + 2 * c;
                let expected = i16::from_le_bytes([bytes[at], bytes[at + 1]]) as f32 / 32768.0;
                assert_eq!(s, expected);
            }
        }
    }

    #[test]
    fn test_extremes_normalize_into_range() {
        // -32768, 32767
        let bytes = [0x00, 0x80, 0xFF, 0x7F];
        let buffer = interpret_pcm16(&bytes, MONO_24K).unwrap();
        let ch = buffer.channel(0).unwrap();
        assert_eq!(ch[0], -1.0);
        assert!(ch[1] < 1.0 && ch[1] > 0.9999);
    }

    #[test]
    fn test_truncates_partial_frames() {
        for len in [1usize, 3, 5, 7, 9, 11] {
            let bytes = pseudo_random_bytes(len);
            let mono = interpret_pcm16(&bytes, MONO_24K).unwrap();
            assert_eq!(mono.frame_count(), len / 2);
            let stereo = interpret_pcm16(&bytes, STEREO_24K).unwrap();
            assert_eq!(stereo.frame_count(), len / 4);
            assert_eq!(stereo.channel(1).unwrap().len(), len / 4);
        }
    }

    #[test]
    fn test_empty_input_is_empty_buffer() {
        let buffer = interpret_pcm16(&[], STEREO_24K).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert!(buffer.channels().iter().all(Vec::is_empty));
        assert!(buffer.is_empty());
        assert_eq!(decode_audio("", MONO_24K).unwrap().frame_count(), 0);
    }

    #[test]
    fn test_metadata_carried_through() {
        let buffer = decode_audio("AAB/AA==", PcmFormat::new(16000, 2)).unwrap();
        assert_eq!(buffer.sample_rate(), 16000);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 1);
        assert_eq!(buffer.duration_secs(), 1.0 / 16000.0);
    }

    #[test]
    fn test_rejects_zero_channels_or_rate() {
        assert_eq!(
            interpret_pcm16(&[0, 0], PcmFormat::new(24000, 0)),
            Err(DecodeError::InvalidFormat { sample_rate: 24000, channels: 0 })
        );
        assert!(interpret_pcm16(&[0, 0], PcmFormat::new(0, 1)).is_err());
    }

    #[test]
    fn test_interleaved_restores_storage_order() {
        let bytes = pseudo_random_bytes(24);
        let buffer = interpret_pcm16(&bytes, STEREO_24K).unwrap();
        let interleaved = buffer.interleaved();
        for (k, &s) in interleaved.iter().enumerate() {
            let expected = i16::from_le_bytes([bytes[2 * k], bytes[2 * k + 1]]) as f32 / 32768.0;
            assert_eq!(s, expected);
        }
    }
}

//! Opus encoder wrapper
//!
//! One encoder per output stream, configured once at stream start.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::constants::{
    DEFAULT_OPUS_COMPLEXITY, MAX_OPUS_PACKET, OPUS_FRAME_DURATIONS_MS, SAMPLE_RATE,
};
use crate::error::CodecError;

/// Encoder settings fixed for the life of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct OpusSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
    /// Frame size in samples per channel
    pub frame_size: usize,
    /// Encoder complexity (0-10)
    pub complexity: u8,
}

impl OpusSettings {
    pub fn new(channels: u16, bitrate: u32, frame_ms: f32) -> Result<Self, CodecError> {
        if !OPUS_FRAME_DURATIONS_MS.contains(&frame_ms) {
            return Err(CodecError::UnsupportedFrameDuration(frame_ms));
        }
        Ok(Self {
            sample_rate: SAMPLE_RATE,
            channels,
            bitrate,
            frame_size: Self::frame_size_from_ms(SAMPLE_RATE, frame_ms),
            complexity: DEFAULT_OPUS_COMPLEXITY,
        })
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn frame_size_from_ms(sample_rate: u32, frame_ms: f32) -> usize {
        (sample_rate as f32 * frame_ms / 1000.0).round() as usize
    }

    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }
}

/// Opus encoder wrapper
pub struct OpusEncoder {
    encoder: Encoder,
    settings: OpusSettings,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create an encoder for music at the configured bitrate
    pub fn new(settings: OpusSettings) -> Result<Self, CodecError> {
        let channels = match settings.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    n
                )))
            }
        };

        let mut encoder = Encoder::new(settings.sample_rate, channels, Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(settings.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Constrained VBR
        encoder
            .set_vbr(true)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;
        encoder
            .set_vbr_constraint(true)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set CVBR: {}", e)))?;

        encoder
            .set_complexity(settings.complexity as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        encoder
            .set_inband_fec(false)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        Ok(Self {
            encoder,
            settings,
            encode_buffer: vec![0u8; MAX_OPUS_PACKET],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode one frame of interleaved samples.
    ///
    /// Input length must be `frame_size * channels`.
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode_float(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    pub fn settings(&self) -> &OpusSettings {
        &self.settings
    }

    /// Frame size in samples per channel
    pub fn frame_size(&self) -> usize {
        self.settings.frame_size
    }

    /// Samples per frame across all channels
    pub fn samples_per_frame(&self) -> usize {
        self.settings.frame_size * self.settings.channels as usize
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        let settings = OpusSettings::new(2, 128_000, 20.0).unwrap();
        let encoder = OpusEncoder::new(settings).unwrap();
        assert_eq!(encoder.frame_size(), 960);
        assert_eq!(encoder.samples_per_frame(), 1920);
        assert!((encoder.settings().frame_duration_ms() - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_encoding_silence() {
        let settings = OpusSettings::new(2, 128_000, 20.0).unwrap();
        let mut encoder = OpusEncoder::new(settings).unwrap();
        let samples = vec![0.0f32; encoder.samples_per_frame()];

        let encoded = encoder.encode(&samples).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.len() < samples.len() * 4);
        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn test_wrong_frame_size() {
        let settings = OpusSettings::new(1, 64_000, 10.0).unwrap();
        let mut encoder = OpusEncoder::new(settings).unwrap();
        assert!(matches!(
            encoder.encode(&[0.0; 100]),
            Err(CodecError::InvalidFrameSize(100))
        ));
    }

    #[test]
    fn test_short_frame_duration() {
        let settings = OpusSettings::new(2, 128_000, 2.5).unwrap();
        assert_eq!(settings.frame_size, 120);
        assert!(OpusSettings::new(2, 128_000, 15.0).is_err());
    }

    #[test]
    fn test_complexity_is_applied() {
        let settings = OpusSettings::new(2, 96_000, 20.0).unwrap();
        assert_eq!(settings.complexity, DEFAULT_OPUS_COMPLEXITY);

        let mut encoder = OpusEncoder::new(settings.with_complexity(3)).unwrap();
        assert_eq!(encoder.settings().complexity, 3);
        let samples = vec![0.0f32; encoder.samples_per_frame()];
        assert!(encoder.encode(&samples).is_ok());
    }

    #[test]
    fn test_rejects_surround() {
        let settings = OpusSettings::new(6, 256_000, 20.0).unwrap();
        assert!(matches!(
            OpusEncoder::new(settings),
            Err(CodecError::EncoderInit(_))
        ));
    }
}

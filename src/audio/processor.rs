//! Audio processing stage
//!
//! Turns accepted PCM frames into transmit-ready payloads, either as L24
//! pass-through or as fixed-size Opus frames cut from an accumulation buffer.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audio::frame::AudioFrame;
use crate::audio::pcm::{encode_l24, l24_to_f32};
use crate::audio::queue::SharedQueue;
use crate::codec::{OpusEncoder, OpusSettings};
use crate::config::{OutputEncoding, RelayConfig};
use crate::constants::{DEFAULT_BITRATE, L24_BYTES};
use crate::error::CodecError;
use crate::pipeline::stats::RelayStats;

/// One transmit-ready payload
#[derive(Debug, Clone, PartialEq)]
pub struct OutputUnit {
    pub payload: Bytes,
    /// Audio duration carried, in samples per channel
    pub samples: u32,
    /// First unit after a gap in the input
    pub marker: bool,
}

/// Output representation, selected once from the configuration
pub enum AudioProcessor {
    Pcm(PcmPassthrough),
    Opus(OpusProcessor),
}

impl AudioProcessor {
    /// Build the processor for the configured output encoding.
    ///
    /// Fails only if the Opus encoder cannot be initialised.
    pub fn from_config(config: &RelayConfig) -> Result<Self, CodecError> {
        let channels = config.tuning.channels;
        match config.output.encoding {
            OutputEncoding::Pcm => Ok(AudioProcessor::Pcm(PcmPassthrough::new(channels))),
            OutputEncoding::Opus => {
                let settings = OpusSettings::new(
                    channels,
                    config.output.bitrate.unwrap_or(DEFAULT_BITRATE),
                    config.tuning.opus_frame_ms,
                )?
                .with_complexity(config.tuning.opus_complexity);
                Ok(AudioProcessor::Opus(OpusProcessor::new(settings)?))
            }
        }
    }

    /// Process one frame. Each result is one output unit or one failed encode.
    pub fn process(&mut self, frame: AudioFrame) -> Vec<Result<OutputUnit, CodecError>> {
        match self {
            AudioProcessor::Pcm(p) => vec![p.process(frame)],
            AudioProcessor::Opus(p) => p.process(frame),
        }
    }

    /// Discard any partial frame held back for the encoder.
    /// Returns the number of samples dropped.
    pub fn finish(&mut self) -> usize {
        match self {
            AudioProcessor::Pcm(_) => 0,
            AudioProcessor::Opus(p) => p.discard_pending(),
        }
    }

    pub fn encoding(&self) -> OutputEncoding {
        match self {
            AudioProcessor::Pcm(_) => OutputEncoding::Pcm,
            AudioProcessor::Opus(_) => OutputEncoding::Opus,
        }
    }
}

/// 1:1 PCM pass-through, re-emitted as big-endian L24
pub struct PcmPassthrough {
    channels: u16,
}

impl PcmPassthrough {
    pub fn new(channels: u16) -> Self {
        Self { channels }
    }

    pub fn process(&mut self, frame: AudioFrame) -> Result<OutputUnit, CodecError> {
        if frame.channels() != self.channels || frame.samples().len() % self.channels as usize != 0
        {
            return Err(CodecError::InvalidFrameSize(frame.samples().len()));
        }
        let mut payload = BytesMut::with_capacity(frame.samples().len() * L24_BYTES);
        encode_l24(frame.samples(), &mut payload);
        Ok(OutputUnit {
            payload: payload.freeze(),
            samples: frame.samples_per_channel() as u32,
            marker: frame.discontinuity(),
        })
    }
}

/// Opus encoding over an accumulation buffer.
///
/// Input frames rarely match the encoder frame length, so samples are
/// appended and exactly one encoder frame is cut whenever enough are held.
/// The remainder carries over to the next input frame.
pub struct OpusProcessor {
    encoder: OpusEncoder,
    pending: Vec<i32>,
    scratch: Vec<f32>,
    /// Session the pending samples belong to
    ssrc: Option<u32>,
    marker_pending: bool,
}

impl OpusProcessor {
    pub fn new(settings: OpusSettings) -> Result<Self, CodecError> {
        let encoder = OpusEncoder::new(settings)?;
        let frame_len = encoder.samples_per_frame();
        Ok(Self {
            encoder,
            pending: Vec::with_capacity(frame_len * 2),
            scratch: Vec::with_capacity(frame_len),
            ssrc: None,
            marker_pending: false,
        })
    }

    pub fn process(&mut self, frame: AudioFrame) -> Vec<Result<OutputUnit, CodecError>> {
        if frame.channels() != self.encoder.settings().channels {
            return vec![Err(CodecError::InvalidFrameSize(frame.samples().len()))];
        }

        // Never splice audio from a restarted source onto the old remainder
        if self.ssrc.is_some_and(|s| s != frame.ssrc()) && !self.pending.is_empty() {
            tracing::debug!(
                "Processor: new source {:08x}, discarding {} pending samples",
                frame.ssrc(),
                self.pending.len()
            );
            self.pending.clear();
        }
        self.ssrc = Some(frame.ssrc());
        self.marker_pending |= frame.discontinuity();

        self.pending.extend_from_slice(frame.samples());

        let frame_len = self.encoder.samples_per_frame();
        let frame_size = self.encoder.frame_size() as u32;
        let mut out = Vec::with_capacity(self.pending.len() / frame_len);
        while self.pending.len() >= frame_len {
            self.scratch.clear();
            self.scratch
                .extend(self.pending.drain(..frame_len).map(l24_to_f32));

            let result = self.encoder.encode(&self.scratch).map(|payload| OutputUnit {
                payload,
                samples: frame_size,
                marker: std::mem::take(&mut self.marker_pending),
            });
            out.push(result);
        }
        out
    }

    /// Samples held back waiting for a full encoder frame
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn encoder(&self) -> &OpusEncoder {
        &self.encoder
    }
}

/// Process loop: queue → processor → queue.
///
/// A failed encode is counted and skipped; only that unit is lost. Runs until
/// the input is closed and drained (or `cancel` fires), then discards any
/// partial encoder frame and closes `output`.
pub async fn run_process_loop(
    mut processor: AudioProcessor,
    input: SharedQueue<AudioFrame>,
    output: SharedQueue<OutputUnit>,
    cancel: CancellationToken,
    stats: Arc<RelayStats>,
) {
    tracing::info!("Processor: producing {:?} output", processor.encoding());

    while let Some(frame) = input.pop(&cancel).await {
        let index = frame.index();
        for result in processor.process(frame) {
            match result {
                Ok(unit) => {
                    RelayStats::bump(&stats.frames_encoded);
                    if !output.push(unit) {
                        RelayStats::bump(&stats.frames_dropped);
                    }
                }
                Err(e) => {
                    RelayStats::bump(&stats.encode_errors);
                    tracing::warn!("Processor: frame {} failed: {}", index, e);
                }
            }
        }
    }

    let discarded = processor.finish();
    if discarded > 0 {
        tracing::debug!("Processor: discarded {} pending samples", discarded);
    }
    output.close();
    tracing::info!("Processor: stopped");
}

//! PCM audio frame handed between pipeline stages

use crate::constants::SAMPLE_RATE;

/// One accepted input packet's worth of 48 kHz, 24-bit PCM.
///
/// Samples are interleaved and sign-extended into `i32`. A frame is built once
/// by the receiver and moved through the queues; no stage mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i32>,
    channels: u16,
    index: u64,
    ssrc: u32,
    discontinuity: bool,
}

impl AudioFrame {
    pub fn new(samples: Vec<i32>, channels: u16, index: u64, ssrc: u32) -> Self {
        Self {
            samples,
            channels,
            index,
            ssrc,
            discontinuity: false,
        }
    }

    /// Mark the frame as following lost packets or a new session
    pub fn with_discontinuity(mut self, discontinuity: bool) -> Self {
        self.discontinuity = discontinuity;
        self
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i32> {
        self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Logical frame index, increasing across the life of the receiver
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Source stream this frame came from
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn discontinuity(&self) -> bool {
        self.discontinuity
    }

    /// Frame duration in samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / SAMPLE_RATE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; 96], 2, 0, 1);
        assert_eq!(frame.samples_per_channel(), 48);
        assert_eq!(frame.duration_us(), 1_000);
        assert!(!frame.discontinuity());
    }
}

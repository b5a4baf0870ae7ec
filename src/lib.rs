//! # Audio Relay
//!
//! Low-latency relay from a Livewire+ or AES67 multicast RTP stream to a
//! single PCM or Opus RTP output.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                     Pipeline Orchestrator (pipeline)                        │
//! │        Idle → Starting → Running → Stopping → Stopped   (or Faulted)        │
//! │                                                                             │
//! │   multicast RTP                                                UDP RTP      │
//! │        │                                                          ▲         │
//! │        ▼                                                          │         │
//! │  ┌─────────────┐   ┌───────┐   ┌─────────────┐   ┌───────┐   ┌─────────────┐│
//! │  │  Receiver   │──▶│ queue │──▶│  Processor  │──▶│ queue │──▶│ Transmitter ││
//! │  │  (network:: │   │ drop- │   │  (audio::   │   │ drop- │   │  (network:: ││
//! │  │   receiver) │   │ oldest│   │  processor) │   │ oldest│   │ transmitter)││
//! │  └──────┬──────┘   └───────┘   └──────┬──────┘   └───────┘   └──────┬──────┘│
//! │         │ sessions, seq/loss          │ PCM or Opus                 │ paced │
//! │         ▼                             ▼                             ▼       │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │                 Shared counters (pipeline::stats)                   │   │
//! │  └─────────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod protocol;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineHandle, PipelineState, StatsSnapshot};

/// Application-wide constants
pub mod constants {
    /// Working sample rate for every stream
    pub const SAMPLE_RATE: u32 = 48000;

    /// Bytes per L24 sample
    pub const L24_BYTES: usize = 3;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 128_000;

    /// Default Opus frame duration in milliseconds
    pub const DEFAULT_OPUS_FRAME_MS: f32 = 20.0;

    /// Default Opus encoder complexity (0-10, 10 is slowest and best)
    pub const DEFAULT_OPUS_COMPLEXITY: u8 = 10;

    /// Highest complexity the encoder accepts
    pub const MAX_OPUS_COMPLEXITY: u8 = 10;

    /// Frame durations Opus accepts
    pub const OPUS_FRAME_DURATIONS_MS: [f32; 6] = [2.5, 5.0, 10.0, 20.0, 40.0, 60.0];

    /// Conventional input port
    pub const DEFAULT_INPUT_PORT: u16 = 5004;

    /// Conventional output port
    pub const DEFAULT_OUTPUT_PORT: u16 = 5005;

    /// Payload type of the PCM (L24) output stream
    pub const PCM_PAYLOAD_TYPE: u8 = 97;

    /// Payload type of the Opus output stream
    pub const OPUS_PAYLOAD_TYPE: u8 = 98;

    /// Inter-stage queue capacity in frames: a 20 ms Opus window of 1 ms
    /// AES67 packets plus a few packets of jitter
    pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

    pub const DEFAULT_SESSION_IDLE_TIMEOUT_MS: u64 = 5_000;
    /// Shorter timeouts would expire sessions between packets
    pub const MIN_SESSION_IDLE_TIMEOUT_MS: u64 = 100;
    pub const DEFAULT_RECV_RETRY_BUDGET: u32 = 5;
    pub const DEFAULT_SEND_RETRY_BUDGET: u32 = 3;
    pub const DEFAULT_SEND_BACKOFF_MS: u64 = 2;
    pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;
    pub const DEFAULT_MULTICAST_TTL: u32 = 16;
    pub const DEFAULT_STATS_INTERVAL_MS: u64 = 10_000;

    /// Receive buffer size for one datagram
    pub const MAX_PACKET_SIZE: usize = 2048;

    /// Upper bound for one encoded Opus packet
    pub const MAX_OPUS_PACKET: usize = 4000;
}

//! Error types for the relay

use thiserror::Error;

use crate::pipeline::PipelineState;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-level packet rejections. Never fatal; the receiver counts and drops.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Unsupported RTP version: {0}")]
    BadVersion(u8),

    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("Invalid padding length: {0}")]
    BadPadding(usize),

    #[error("Unexpected payload type {0} for {1}")]
    UnknownPayloadType(u8, &'static str),

    #[error("Missing Livewire channel extension")]
    MissingChannelExtension,

    #[error("Channel mismatch: stream carries {found}, relay expects {expected}")]
    ChannelMismatch { expected: u16, found: u16 },

    #[error("Payload of {len} bytes is not whole L24 frames of {channels} channels")]
    MisalignedPayload { len: usize, channels: u16 },
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Unsupported frame duration: {0} ms")]
    UnsupportedFrameDuration(f32),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Multicast join failed for {group}: {reason}")]
    JoinFailed { group: String, reason: String },

    #[error("Invalid destination address: {0}")]
    InvalidDestination(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("{stage} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        stage: &'static str,
        attempts: u32,
        last: String,
    },
}

/// Pipeline lifecycle errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: PipelineState, to: PipelineState },

    #[error("Stage {stage} faulted: {reason}")]
    StageFault { stage: &'static str, reason: String },

    #[error("Stage {0} did not exit within the grace period")]
    ShutdownTimeout(&'static str),
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;

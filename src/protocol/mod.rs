//! Wire protocol: RTP framing and input format variants

pub mod format;
pub mod rtp;

pub use format::InputFormat;
pub use rtp::{sequence_delta, RtpExtension, RtpPacket};

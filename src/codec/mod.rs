//! Opus codec wrapper
//!
//! Provides the output-side Opus encoder.

pub mod encoder;

pub use encoder::{OpusEncoder, OpusSettings};

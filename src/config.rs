//! Relay configuration
//!
//! Mirrors the JSON document consumed by the relay:
//!
//! ```json
//! {
//!   "input":  { "multicast_address": "239.192.0.1", "port": 5004, "format": "aes67" },
//!   "output": { "destination_address": "192.168.1.100", "destination_port": 5005,
//!               "encoding": "opus", "bitrate": 128000 }
//! }
//! ```
//!
//! An optional `tuning` object overrides the pipeline tunables.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::InputFormat;

/// Complete relay configuration. Immutable once a pipeline is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

/// Input stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub multicast_address: Ipv4Addr,
    pub port: u16,
    pub format: InputFormat,
}

/// Output stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Kept as text so an unparseable address surfaces as a start failure.
    pub destination_address: String,
    pub destination_port: u16,
    pub encoding: OutputEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
}

/// Output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    Pcm,
    Opus,
}

impl OutputEncoding {
    /// RTP payload type advertised on the output stream
    pub fn payload_type(&self) -> u8 {
        match self {
            OutputEncoding::Pcm => PCM_PAYLOAD_TYPE,
            OutputEncoding::Opus => OPUS_PAYLOAD_TYPE,
        }
    }
}

/// Pipeline tunables. Every field has a default so the section may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Interface used for the multicast join
    pub interface: Ipv4Addr,
    /// Channel count carried by the input stream
    pub channels: u16,
    /// Capacity of each inter-stage queue, in frames
    pub queue_capacity: usize,
    pub session_idle_timeout_ms: u64,
    /// Immediate retries on socket read errors before escalating
    pub recv_retry_budget: u32,
    /// Retries per packet on send errors before escalating
    pub send_retry_budget: u32,
    /// Initial send retry backoff, doubled on each attempt
    pub send_backoff_ms: u64,
    pub shutdown_grace_ms: u64,
    pub opus_frame_ms: f32,
    /// Opus encoder complexity, 0..=10
    pub opus_complexity: u8,
    pub multicast_ttl: u32,
    pub stats_interval_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            channels: DEFAULT_CHANNELS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            session_idle_timeout_ms: DEFAULT_SESSION_IDLE_TIMEOUT_MS,
            recv_retry_budget: DEFAULT_RECV_RETRY_BUDGET,
            send_retry_budget: DEFAULT_SEND_RETRY_BUDGET,
            send_backoff_ms: DEFAULT_SEND_BACKOFF_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            opus_frame_ms: DEFAULT_OPUS_FRAME_MS,
            opus_complexity: DEFAULT_OPUS_COMPLEXITY,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
        }
    }
}

impl TuningConfig {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }

    pub fn send_backoff(&self) -> Duration {
        Duration::from_millis(self.send_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Opus frame length in samples per channel
    pub fn opus_frame_samples(&self) -> usize {
        (SAMPLE_RATE as f32 * self.opus_frame_ms / 1000.0).round() as usize
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            input: InputConfig {
                multicast_address: Ipv4Addr::new(239, 192, 0, 1),
                port: DEFAULT_INPUT_PORT,
                format: InputFormat::Aes67,
            },
            output: OutputConfig {
                destination_address: "127.0.0.1".to_string(),
                destination_port: DEFAULT_OUTPUT_PORT,
                encoding: OutputEncoding::Opus,
                bitrate: Some(DEFAULT_BITRATE),
            },
            tuning: TuningConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a configuration document
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: RelayConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is internally consistent
    pub fn validate(&self) -> Result<()> {
        if !self.input.multicast_address.is_multicast() {
            return Err(Error::Config(format!(
                "{} is not a multicast address",
                self.input.multicast_address
            )));
        }
        check_port("input.port", self.input.port)?;
        check_port("output.destination_port", self.output.destination_port)?;

        self.destination_ip()?;

        if self.output.encoding == OutputEncoding::Opus {
            match self.output.bitrate {
                Some(b) if b > 0 => {}
                _ => {
                    return Err(Error::Config(
                        "bitrate must be specified and positive for Opus encoding".into(),
                    ))
                }
            }
            if !OPUS_FRAME_DURATIONS_MS.contains(&self.tuning.opus_frame_ms) {
                return Err(Error::Config(format!(
                    "opus_frame_ms must be one of {:?}",
                    OPUS_FRAME_DURATIONS_MS
                )));
            }
            if self.tuning.opus_complexity > MAX_OPUS_COMPLEXITY {
                return Err(Error::Config(format!(
                    "opus_complexity must be 0..={}, got {}",
                    MAX_OPUS_COMPLEXITY, self.tuning.opus_complexity
                )));
            }
            if !(1..=2).contains(&self.tuning.channels) {
                return Err(Error::Config("Opus output supports 1 or 2 channels".into()));
            }
        }

        if self.tuning.channels == 0 {
            return Err(Error::Config("channels must be at least 1".into()));
        }
        if self.tuning.session_idle_timeout_ms < MIN_SESSION_IDLE_TIMEOUT_MS {
            return Err(Error::Config(format!(
                "session_idle_timeout_ms must be at least {}",
                MIN_SESSION_IDLE_TIMEOUT_MS
            )));
        }
        if self.tuning.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Parsed destination address
    pub fn destination_ip(&self) -> Result<IpAddr> {
        self.output
            .destination_address
            .parse()
            .map_err(|_| {
                Error::Config(format!(
                    "invalid destination address: {}",
                    self.output.destination_address
                ))
            })
    }
}

fn check_port(name: &str, port: u16) -> Result<()> {
    if port < 1024 {
        return Err(Error::Config(format!(
            "{} must be between 1024 and 65535, got {}",
            name, port
        )));
    }
    Ok(())
}

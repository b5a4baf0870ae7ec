//! Paced RTP transmitter
//!
//! Wraps processed units in RTP with the output stream's own numbering and
//! sends them to the destination at real-time rate.

use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::audio::{OutputUnit, SharedQueue};
use crate::config::OutputEncoding;
use crate::constants::SAMPLE_RATE;
use crate::error::{NetworkError, PipelineError};
use crate::pipeline::stats::RelayStats;
use crate::protocol::RtpPacket;

/// Outgoing stream numbering, independent of any input stream
#[derive(Debug, Clone)]
pub struct OutputStream {
    pub destination: SocketAddr,
    pub encoding: OutputEncoding,
    pub payload_type: u8,
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
    packets: u64,
}

impl OutputStream {
    /// New stream with random sequence, timestamp and SSRC origins
    pub fn new(destination: SocketAddr, encoding: OutputEncoding) -> Self {
        let mut rng = rand::thread_rng();
        Self::with_origin(destination, encoding, rng.gen(), rng.gen(), rng.gen())
    }

    pub fn with_origin(
        destination: SocketAddr,
        encoding: OutputEncoding,
        sequence: u16,
        timestamp: u32,
        ssrc: u32,
    ) -> Self {
        Self {
            destination,
            encoding,
            payload_type: encoding.payload_type(),
            ssrc,
            sequence,
            timestamp,
            packets: 0,
        }
    }

    /// Build the next packet and advance sequence by one and timestamp by
    /// the unit's sample count. The first packet always carries the marker.
    pub fn packetize(&mut self, unit: &OutputUnit) -> RtpPacket {
        let packet = RtpPacket::new(
            self.payload_type,
            self.sequence,
            self.timestamp,
            self.ssrc,
            unit.payload.clone(),
        )
        .with_marker(unit.marker || self.packets == 0);

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(unit.samples);
        self.packets += 1;
        packet
    }

    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    pub fn next_timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }
}

/// Send-time scheduler anchored at the start of the stream.
///
/// Deadlines are `anchor + samples_sent / rate`, so per-iteration sleep error
/// never accumulates. If the sender falls more than one unit behind (input
/// stalled), the anchor moves to now instead of bursting to catch up.
#[derive(Debug, Default)]
pub struct Pacer {
    anchor: Option<Instant>,
    samples: u64,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline for a unit of `samples` about to be sent at `now`
    pub fn schedule(&mut self, now: Instant, samples: u32) -> Instant {
        let anchor = *self.anchor.get_or_insert(now);
        let mut deadline = anchor + samples_to_duration(self.samples);

        if now > deadline + samples_to_duration(samples as u64) {
            tracing::debug!(
                "Transmitter: {:?} behind schedule, re-anchoring",
                now - deadline
            );
            self.anchor = Some(now);
            self.samples = 0;
            deadline = now;
        }

        self.samples += samples as u64;
        deadline
    }
}

fn samples_to_duration(samples: u64) -> Duration {
    let nanos = samples as u128 * 1_000_000_000 / SAMPLE_RATE as u128;
    Duration::from_nanos(nanos as u64)
}

/// Transmit-side state. Owned by the transmit loop alone.
pub struct RtpTransmitter {
    socket: UdpSocket,
    stream: OutputStream,
    pacer: Pacer,
    retry_budget: u32,
    backoff: Duration,
    stats: Arc<RelayStats>,
}

impl RtpTransmitter {
    pub fn new(
        socket: UdpSocket,
        stream: OutputStream,
        retry_budget: u32,
        backoff: Duration,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            socket,
            stream,
            pacer: Pacer::new(),
            retry_budget,
            backoff,
            stats,
        }
    }

    /// Wait for the unit's send slot, then send it.
    ///
    /// Returns `Ok(false)` if cancelled while waiting.
    pub async fn send_paced(
        &mut self,
        unit: &OutputUnit,
        cancel: &CancellationToken,
    ) -> Result<bool, NetworkError> {
        let deadline = self.pacer.schedule(Instant::now(), unit.samples);
        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = cancel.cancelled() => return Ok(false),
        }
        self.send(unit, cancel).await
    }

    /// Packetize and send, retrying with doubling backoff.
    ///
    /// Returns `Ok(false)` if cancelled during a backoff wait.
    pub async fn send(
        &mut self,
        unit: &OutputUnit,
        cancel: &CancellationToken,
    ) -> Result<bool, NetworkError> {
        let wire = self.stream.packetize(unit).to_bytes();
        let destination = self.stream.destination;

        let mut delay = self.backoff;
        let mut attempt = 0u32;
        loop {
            match self.socket.send_to(&wire, destination).await {
                Ok(sent) => {
                    RelayStats::bump(&self.stats.packets_sent);
                    RelayStats::add(&self.stats.bytes_sent, sent as u64);
                    return Ok(true);
                }
                Err(e) => {
                    RelayStats::bump(&self.stats.send_failures);
                    attempt += 1;
                    if attempt > self.retry_budget {
                        return Err(NetworkError::RetriesExhausted {
                            stage: "transmitter",
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        "Transmitter: send to {} failed ({}/{}): {}",
                        destination,
                        attempt,
                        self.retry_budget,
                        e
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cancel.cancelled() => return Ok(false),
                    }
                    delay *= 2;
                }
            }
        }
    }

    pub fn stream(&self) -> &OutputStream {
        &self.stream
    }
}

/// Transmit loop: queue → paced sends.
///
/// Drains the queue until it is closed and empty, or `cancel` fires. A send
/// that exhausts its retries is reported as a fault and ends the loop. The
/// socket is released when the loop returns.
pub async fn run_transmit_loop(
    mut transmitter: RtpTransmitter,
    input: SharedQueue<OutputUnit>,
    cancel: CancellationToken,
    faults: mpsc::Sender<PipelineError>,
) {
    tracing::info!(
        "Transmitter: sending {:?} to {} (pt {}, ssrc {:08x})",
        transmitter.stream.encoding,
        transmitter.stream.destination,
        transmitter.stream.payload_type,
        transmitter.stream.ssrc
    );

    while let Some(unit) = input.pop(&cancel).await {
        match transmitter.send_paced(&unit, &cancel).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::error!("Transmitter: {}", e);
                let fault = PipelineError::StageFault {
                    stage: "transmitter",
                    reason: e.to_string(),
                };
                if let Err(unsent) = faults.send(fault).await {
                    tracing::error!("Transmitter: no supervisor to report {}", unsent.0);
                }
                break;
            }
        }
    }

    tracing::info!(
        "Transmitter: stopped after {} packets",
        transmitter.stream.packets()
    );
}

//! Per-source stream sessions and sequence tracking

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::{sequence_delta, InputFormat};

/// What the sequence number of a new packet means for its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// First packet of a new session (or a restarted source)
    Started,
    InOrder,
    /// Accepted after skipping `lost` packets
    Gap { lost: u16 },
    /// Same sequence number as the last accepted packet
    Duplicate,
    /// Older than the last accepted packet
    Reordered,
}

/// One input source, identified by address and SSRC
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub source: IpAddr,
    pub ssrc: u32,
    pub format: InputFormat,
    pub last_sequence: u16,
    pub last_timestamp: u32,
    pub last_seen: Instant,
    pub received: u64,
    pub lost: u64,
    pub duplicates: u64,
    pub reordered: u64,
}

impl StreamSession {
    fn new(source: IpAddr, ssrc: u32, format: InputFormat, seq: u16, ts: u32, now: Instant) -> Self {
        Self {
            source,
            ssrc,
            format,
            last_sequence: seq,
            last_timestamp: ts,
            last_seen: now,
            received: 1,
            lost: 0,
            duplicates: 0,
            reordered: 0,
        }
    }

    /// Classify `seq` and advance the session if accepted.
    /// Rejected packets leave sequence and timestamp state untouched.
    pub fn observe(&mut self, seq: u16, timestamp: u32, now: Instant) -> SequenceOutcome {
        let delta = sequence_delta(self.last_sequence, seq);
        let outcome = match delta {
            1 => SequenceOutcome::InOrder,
            d if d > 1 => SequenceOutcome::Gap { lost: (d - 1) as u16 },
            0 => SequenceOutcome::Duplicate,
            _ => SequenceOutcome::Reordered,
        };

        match outcome {
            SequenceOutcome::Duplicate => self.duplicates += 1,
            SequenceOutcome::Reordered => self.reordered += 1,
            _ => {
                if let SequenceOutcome::Gap { lost } = outcome {
                    self.lost += lost as u64;
                }
                self.last_sequence = seq;
                self.last_timestamp = timestamp;
                self.last_seen = now;
                self.received += 1;
            }
        }
        outcome
    }
}

/// Live sessions keyed by source address
///
/// A source carries one stream at a time; a new SSRC from a known address
/// replaces its session.
#[derive(Debug)]
pub struct SessionTable {
    format: InputFormat,
    idle_timeout: Duration,
    sessions: HashMap<IpAddr, StreamSession>,
}

impl SessionTable {
    pub fn new(format: InputFormat, idle_timeout: Duration) -> Self {
        Self {
            format,
            idle_timeout,
            sessions: HashMap::new(),
        }
    }

    /// Look up or create the session for this packet and classify it
    pub fn observe(
        &mut self,
        source: IpAddr,
        ssrc: u32,
        seq: u16,
        timestamp: u32,
        now: Instant,
    ) -> SequenceOutcome {
        if let Some(session) = self.sessions.get_mut(&source) {
            let idle = now.saturating_duration_since(session.last_seen) > self.idle_timeout;
            if session.ssrc == ssrc && !idle {
                return session.observe(seq, timestamp, now);
            }
            if idle {
                tracing::info!(
                    "Receiver: session {} (ssrc {:08x}) resumed after idle timeout",
                    source,
                    session.ssrc
                );
            } else {
                tracing::info!(
                    "Receiver: source {} restarted (ssrc {:08x} -> {:08x}), resetting session",
                    source,
                    session.ssrc,
                    ssrc
                );
            }
        } else {
            tracing::info!("Receiver: new session from {} (ssrc {:08x})", source, ssrc);
        }

        self.sessions.insert(
            source,
            StreamSession::new(source, ssrc, self.format, seq, timestamp, now),
        );
        SequenceOutcome::Started
    }

    /// Drop sessions that have been silent for longer than the idle timeout.
    /// Returns the number removed.
    pub fn expire_idle(&mut self, now: Instant) -> usize {
        let timeout = self.idle_timeout;
        let before = self.sessions.len();
        self.sessions.retain(|source, session| {
            let alive = now.saturating_duration_since(session.last_seen) <= timeout;
            if !alive {
                tracing::info!(
                    "Receiver: session {} (ssrc {:08x}) idle, removing ({} received, {} lost)",
                    source,
                    session.ssrc,
                    session.received,
                    session.lost
                );
            }
            alive
        });
        before - self.sessions.len()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn get(&self, source: &IpAddr) -> Option<&StreamSession> {
        self.sessions.get(source)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

//! Pipeline counters
//!
//! Every stage bumps these lock-free; external health reporting reads a
//! [`StatsSnapshot`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by all stages of one pipeline
#[derive(Debug, Default)]
pub struct RelayStats {
    pub packets_received: AtomicU64,
    pub packets_malformed: AtomicU64,
    pub packets_duplicate: AtomicU64,
    pub packets_reordered: AtomicU64,
    pub packets_lost: AtomicU64,
    pub sessions_started: AtomicU64,
    pub frames_accepted: AtomicU64,
    /// Frames or units evicted from a full hand-off queue
    pub frames_dropped: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub encode_errors: AtomicU64,
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_failures: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, started_at: DateTime<Utc>) -> StatsSnapshot {
        StatsSnapshot {
            started_at,
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            packets_duplicate: self.packets_duplicate.load(Ordering::Relaxed),
            packets_reordered: self.packets_reordered.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub packets_received: u64,
    pub packets_malformed: u64,
    pub packets_duplicate: u64,
    pub packets_reordered: u64,
    pub packets_lost: u64,
    pub sessions_started: u64,
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub frames_encoded: u64,
    pub encode_errors: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
}

impl StatsSnapshot {
    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds().max(1) as f64 / 1000.0
    }

    /// Packets rejected at the receiver, as a percentage of packets received
    pub fn error_rate(&self) -> f64 {
        let rejected = self.packets_malformed + self.packets_duplicate + self.packets_reordered;
        rejected as f64 * 100.0 / self.packets_received.max(1) as f64
    }

    /// Log a one-line summary with rates
    pub fn log(&self) {
        let elapsed = self.elapsed_secs();
        tracing::info!(
            "Stats: received {} packets ({:.1}/s), sent {} packets ({:.1}/s, {:.1} KB), \
             malformed {}, duplicate {}, reordered {}, lost {}, dropped {} frames, \
             encoded {} ({} errors), send failures {} ({:.2}% rejected)",
            self.packets_received,
            self.packets_received as f64 / elapsed,
            self.packets_sent,
            self.packets_sent as f64 / elapsed,
            self.bytes_sent as f64 / 1024.0,
            self.packets_malformed,
            self.packets_duplicate,
            self.packets_reordered,
            self.packets_lost,
            self.frames_dropped,
            self.frames_encoded,
            self.encode_errors,
            self.send_failures,
            self.error_rate()
        );
    }
}

//! Multicast RTP stream receiver
//!
//! Validates each datagram for the configured input format, tracks sequence
//! numbers per session and turns accepted packets into [`AudioFrame`]s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::audio::pcm::decode_l24;
use crate::audio::{AudioFrame, SharedQueue};
use crate::constants::MAX_PACKET_SIZE;
use crate::error::{NetworkError, PacketError, PipelineError};
use crate::network::session::{SequenceOutcome, SessionTable};
use crate::pipeline::stats::RelayStats;
use crate::protocol::{InputFormat, RtpPacket};

/// Datagram-to-frame stage state. Owned by the receive loop alone.
pub struct StreamReceiver {
    format: InputFormat,
    channels: u16,
    sessions: SessionTable,
    next_index: u64,
    stats: Arc<RelayStats>,
}

impl StreamReceiver {
    pub fn new(
        format: InputFormat,
        channels: u16,
        idle_timeout: Duration,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            format,
            channels,
            sessions: SessionTable::new(format, idle_timeout),
            next_index: 0,
            stats,
        }
    }

    /// Handle one datagram. Returns the decoded frame if the packet was
    /// accepted; every rejection is counted and logged at debug level.
    pub fn ingest(&mut self, source: SocketAddr, datagram: &[u8], now: Instant) -> Option<AudioFrame> {
        RelayStats::bump(&self.stats.packets_received);

        let packet = match self.parse(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                RelayStats::bump(&self.stats.packets_malformed);
                tracing::debug!("Receiver: dropping malformed packet from {}: {}", source, e);
                return None;
            }
        };

        let outcome = self.sessions.observe(
            source.ip(),
            packet.ssrc,
            packet.sequence_number,
            packet.timestamp,
            now,
        );

        match outcome {
            SequenceOutcome::Duplicate => {
                RelayStats::bump(&self.stats.packets_duplicate);
                tracing::debug!(ssrc = packet.ssrc, seq = packet.sequence_number, "Receiver: duplicate");
                return None;
            }
            SequenceOutcome::Reordered => {
                RelayStats::bump(&self.stats.packets_reordered);
                tracing::debug!(ssrc = packet.ssrc, seq = packet.sequence_number, "Receiver: late packet");
                return None;
            }
            SequenceOutcome::Gap { lost } => {
                RelayStats::add(&self.stats.packets_lost, lost as u64);
                tracing::debug!(ssrc = packet.ssrc, seq = packet.sequence_number, lost, "Receiver: gap");
            }
            SequenceOutcome::Started => RelayStats::bump(&self.stats.sessions_started),
            SequenceOutcome::InOrder => {}
        }

        let index = self.next_index;
        self.next_index += 1;
        RelayStats::bump(&self.stats.frames_accepted);

        let discontinuity = !matches!(outcome, SequenceOutcome::InOrder);
        Some(
            AudioFrame::new(decode_l24(&packet.payload), self.channels, index, packet.ssrc)
                .with_discontinuity(discontinuity),
        )
    }

    fn parse(&self, datagram: &[u8]) -> Result<RtpPacket, PacketError> {
        let packet = RtpPacket::parse(datagram)?;
        self.format.validate(&packet, self.channels)?;
        Ok(packet)
    }

    pub fn expire_idle(&mut self, now: Instant) -> usize {
        self.sessions.expire_idle(now)
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn format(&self) -> InputFormat {
        self.format
    }
}

/// Receive loop: socket → receiver → queue.
///
/// Read errors are retried immediately up to `retry_budget` times in a row;
/// past that the loop reports a fault and exits. Always closes `output` on
/// exit so the processor can drain.
pub async fn run_receive_loop(
    mut receiver: StreamReceiver,
    socket: UdpSocket,
    output: SharedQueue<AudioFrame>,
    cancel: CancellationToken,
    retry_budget: u32,
    faults: mpsc::Sender<PipelineError>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let mut consecutive_errors = 0u32;
    let idle_period = (receiver.sessions.idle_timeout() / 2).max(Duration::from_millis(100));
    let mut idle_check = interval(idle_period);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("Receiver: listening for {} stream", receiver.format().name());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = idle_check.tick() => {
                receiver.expire_idle(Instant::now());
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, source)) => {
                    consecutive_errors = 0;
                    if let Some(frame) = receiver.ingest(source, &buf[..len], Instant::now()) {
                        if !output.push(frame) {
                            RelayStats::bump(&receiver.stats.frames_dropped);
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        "Receiver: read error ({}/{}): {}",
                        consecutive_errors,
                        retry_budget,
                        e
                    );
                    if consecutive_errors > retry_budget {
                        let err = NetworkError::RetriesExhausted {
                            stage: "receiver",
                            attempts: consecutive_errors,
                            last: e.to_string(),
                        };
                        let fault = PipelineError::StageFault {
                            stage: "receiver",
                            reason: err.to_string(),
                        };
                        if let Err(unsent) = faults.send(fault).await {
                            tracing::error!("Receiver: no supervisor to report {}", unsent.0);
                        }
                        break;
                    }
                }
            }
        }
    }

    receiver.sessions.clear();
    output.close();
    tracing::info!("Receiver: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::format::{livewire_channel_map, LIVEWIRE_EXT_PROFILE};
    use bytes::Bytes;

    const SOURCE: &str = "10.0.0.5:5004";

    fn receiver(format: InputFormat) -> (StreamReceiver, Arc<RelayStats>) {
        let stats = Arc::new(RelayStats::new());
        let r = StreamReceiver::new(format, 2, Duration::from_secs(5), stats.clone());
        (r, stats)
    }

    fn aes67(seq: u16, ssrc: u32) -> Vec<u8> {
        // one 1 ms packet: 48 stereo L24 samples
        RtpPacket::new(96, seq, seq as u32 * 48, ssrc, Bytes::from(vec![0u8; 48 * 6]))
            .to_bytes()
            .to_vec()
    }

    fn count(counter: &std::sync::atomic::AtomicU64) -> u64 {
        counter.load(std::sync::atomic::Ordering::Relaxed)
    }

    #[tokio::test]
    async fn test_accepts_in_order_stream() {
        let (mut r, stats) = receiver(InputFormat::Aes67);
        let src = SOURCE.parse().unwrap();
        let now = Instant::now();

        for seq in 0..10u16 {
            let frame = r.ingest(src, &aes67(seq, 7), now).unwrap();
            assert_eq!(frame.index(), seq as u64);
            assert_eq!(frame.samples_per_channel(), 48);
            assert_eq!(frame.discontinuity(), seq == 0);
        }
        assert_eq!(count(&stats.frames_accepted), 10);
        assert_eq!(count(&stats.sessions_started), 1);
    }

    #[tokio::test]
    async fn test_malformed_never_touches_sessions() {
        let (mut r, stats) = receiver(InputFormat::Aes67);
        let src = SOURCE.parse().unwrap();
        let now = Instant::now();

        assert!(r.ingest(src, &[0x80; 8], now).is_none());

        let mut bad_version = aes67(1, 7);
        bad_version[0] = 0x40;
        assert!(r.ingest(src, &bad_version, now).is_none());

        let wrong_pt = RtpPacket::new(10, 1, 0, 7, Bytes::from(vec![0u8; 6])).to_bytes();
        assert!(r.ingest(src, &wrong_pt, now).is_none());

        assert_eq!(count(&stats.packets_malformed), 3);
        assert!(r.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_sequence_filtering() {
        let (mut r, stats) = receiver(InputFormat::Aes67);
        let src: SocketAddr = SOURCE.parse().unwrap();
        let now = Instant::now();

        r.ingest(src, &aes67(100, 7), now).unwrap();
        assert!(r.ingest(src, &aes67(100, 7), now).is_none());
        assert!(r.ingest(src, &aes67(99, 7), now).is_none());

        let frame = r.ingest(src, &aes67(105, 7), now).unwrap();
        assert!(frame.discontinuity());

        assert_eq!(count(&stats.packets_duplicate), 1);
        assert_eq!(count(&stats.packets_reordered), 1);
        assert_eq!(count(&stats.packets_lost), 4);
        assert_eq!(r.sessions().get(&src.ip()).unwrap().last_sequence, 105);
    }

    #[tokio::test]
    async fn test_livewire_needs_channel_map() {
        let (mut r, stats) = receiver(InputFormat::Livewire);
        let src = SOURCE.parse().unwrap();
        let now = Instant::now();

        let bare = RtpPacket::new(97, 1, 0, 3, Bytes::from(vec![0u8; 12])).to_bytes();
        assert!(r.ingest(src, &bare, now).is_none());

        let mapped = RtpPacket::new(97, 2, 0, 3, Bytes::from(vec![0u8; 12]))
            .with_extension(LIVEWIRE_EXT_PROFILE, livewire_channel_map(2).to_vec())
            .to_bytes();
        let frame = r.ingest(src, &mapped, now).unwrap();
        assert_eq!(frame.samples().len(), 4);
        assert_eq!(count(&stats.packets_malformed), 1);
    }

    #[tokio::test]
    async fn test_decodes_network_order() {
        let (mut r, _) = receiver(InputFormat::Aes67);
        let src = SOURCE.parse().unwrap();
        let payload = Bytes::from_static(&[0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFE]);
        let wire = RtpPacket::new(97, 1, 0, 1, payload).to_bytes();

        let frame = r.ingest(src, &wire, Instant::now()).unwrap();
        assert_eq!(frame.samples(), &[1, -2]);
    }

    #[tokio::test]
    async fn test_receive_loop_closes_queue_on_cancel() {
        let (r, _) = receiver(InputFormat::Aes67);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = socket.local_addr().unwrap();
        let queue = crate::audio::create_shared_queue(8);
        let cancel = CancellationToken::new();
        let (fault_tx, _fault_rx) = mpsc::channel(1);

        let task = tokio::spawn(run_receive_loop(
            r,
            socket,
            queue.clone(),
            cancel.clone(),
            3,
            fault_tx,
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&aes67(1, 5), dest).await.unwrap();

        let frame = queue.pop(&CancellationToken::new()).await.unwrap();
        assert_eq!(frame.ssrc(), 5);

        cancel.cancel();
        task.await.unwrap();
        assert!(queue.is_closed());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_read_errors_past_budget_escalate() {
        // A connected socket reports the peer's ICMP port unreachable on read
        let closed = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let closed_addr = closed.local_addr().unwrap();
        drop(closed);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(closed_addr).await.unwrap();
        socket.send(b"x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (r, _) = receiver(InputFormat::Aes67);
        let queue = crate::audio::create_shared_queue(8);
        let (fault_tx, mut fault_rx) = mpsc::channel(1);

        tokio::time::timeout(
            Duration::from_secs(2),
            run_receive_loop(r, socket, queue.clone(), CancellationToken::new(), 0, fault_tx),
        )
        .await
        .unwrap();

        assert!(matches!(
            fault_rx.try_recv(),
            Ok(PipelineError::StageFault { stage: "receiver", .. })
        ));
        assert!(queue.is_closed());
    }
}

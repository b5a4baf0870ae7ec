//! Stage-to-stage tests over synthetic RTP traffic

use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use audio_relay::audio::{create_shared_queue, run_process_loop, AudioFrame, AudioProcessor};
use audio_relay::config::OutputEncoding;
use audio_relay::network::{run_transmit_loop, OutputStream, RtpTransmitter, StreamReceiver};
use audio_relay::pipeline::{Pipeline, PipelineState, RelayStats};
use audio_relay::protocol::{InputFormat, RtpPacket};
use audio_relay::RelayConfig;

const SOURCE: &str = "192.168.1.20:5004";

/// AES67 packet of `samples` stereo silence
fn aes67_packet(seq: u16, samples: u32, ssrc: u32) -> Vec<u8> {
    let payload = vec![0u8; samples as usize * 2 * 3];
    RtpPacket::new(97, seq, seq as u32 * samples, ssrc, Bytes::from(payload))
        .to_bytes()
        .to_vec()
}

fn scenario_config() -> RelayConfig {
    RelayConfig::from_json_str(
        r#"{
            "input": {"multicast_address": "239.192.0.1", "port": 5004, "format": "aes67"},
            "output": {"destination_address": "192.168.1.100", "destination_port": 5005,
                       "encoding": "opus", "bitrate": 128000}
        }"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_hundred_silent_packets_to_opus() {
    let config = scenario_config();
    let stats = Arc::new(RelayStats::new());
    let mut receiver = StreamReceiver::new(
        config.input.format,
        config.tuning.channels,
        config.tuning.session_idle_timeout(),
        stats.clone(),
    );
    let processor = AudioProcessor::from_config(&config).unwrap();

    let source: SocketAddr = SOURCE.parse().unwrap();
    let now = Instant::now();
    let frames = create_shared_queue(128);

    // 1 ms packets, the usual AES67 packet time
    for seq in 0..100u16 {
        let frame = receiver
            .ingest(source, &aes67_packet(seq, 48, 0xAE67), now)
            .expect("in-order packet accepted");
        frames.push(frame);
    }
    frames.close();

    // Stand-in for 192.168.1.100:5005
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let transmitter = RtpTransmitter::new(
        UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        OutputStream::new(listener.local_addr().unwrap(), config.output.encoding),
        config.tuning.send_retry_budget,
        config.tuning.send_backoff(),
        stats.clone(),
    );
    let units = create_shared_queue(config.tuning.queue_capacity);
    let cancel = CancellationToken::new();
    let (fault_tx, mut fault_rx) = mpsc::channel(4);

    tokio::join!(
        run_process_loop(processor, frames, units.clone(), cancel.clone(), stats.clone()),
        run_transmit_loop(transmitter, units, cancel, fault_tx),
    );

    assert!(fault_rx.try_recv().is_err());

    let snap = stats.snapshot(chrono::Utc::now());
    assert_eq!(snap.frames_accepted, 100);
    // 4800 samples per channel in 960-sample Opus frames
    assert_eq!(snap.frames_encoded, 5);
    assert_eq!(snap.encode_errors, 0);
    assert_eq!(snap.packets_sent, 5);
    assert_eq!(snap.frames_dropped, 0);
    assert_eq!(snap.packets_malformed, 0);
    assert_eq!(snap.packets_lost, 0);
    assert_eq!(snap.sessions_started, 1);

    let mut buf = [0u8; 2048];
    let (n, _) = listener.recv_from(&mut buf).await.unwrap();
    let first = RtpPacket::parse(&buf[..n]).unwrap();
    assert_eq!(first.payload_type, 98);
    assert!(first.marker);
}

#[tokio::test]
async fn test_half_frames_accumulate_without_drift() {
    let mut config = scenario_config();
    config.tuning.opus_frame_ms = 20.0;
    let mut processor = AudioProcessor::from_config(&config).unwrap();

    let mut encoded = 0;
    for i in 0..1000u64 {
        let frame = AudioFrame::new(vec![0; 480 * 2], 2, i, 1);
        encoded += processor.process(frame).len();
    }
    assert_eq!(encoded, 500);
    assert_eq!(processor.finish(), 0);
}

#[tokio::test]
async fn test_full_queue_drops_oldest() {
    let queue = create_shared_queue(32);
    for i in 0..1000u64 {
        queue.push(AudioFrame::new(vec![0; 96], 2, i, 1));
        assert!(queue.len() <= 32);
    }
    assert_eq!(queue.dropped(), 968);

    let oldest = queue.try_pop().unwrap();
    assert_eq!(oldest.index(), 968);
}

/// Run the processor and transmitter stages against a loopback listener
async fn relay_pcm(frames: Vec<AudioFrame>, listener: &UdpSocket) -> Vec<RtpPacket> {
    let destination = listener.local_addr().unwrap();
    let stats = Arc::new(RelayStats::new());
    let input = create_shared_queue(64);
    let units = create_shared_queue(64);
    let cancel = CancellationToken::new();
    let (fault_tx, mut fault_rx) = mpsc::channel(1);

    let count = frames.len();
    for frame in frames {
        input.push(frame);
    }
    input.close();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let transmitter = RtpTransmitter::new(
        socket,
        OutputStream::new(destination, OutputEncoding::Pcm),
        3,
        Duration::from_millis(1),
        stats.clone(),
    );

    let mut config = RelayConfig::default();
    config.output.encoding = OutputEncoding::Pcm;
    let processor = AudioProcessor::from_config(&config).unwrap();

    tokio::join!(
        run_process_loop(processor, input, units.clone(), cancel.clone(), stats.clone()),
        run_transmit_loop(transmitter, units, cancel, fault_tx),
    );
    assert!(fault_rx.try_recv().is_err());

    let mut packets = Vec::with_capacity(count);
    let mut buf = [0u8; 2048];
    for _ in 0..count {
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        packets.push(RtpPacket::parse(&buf[..n]).unwrap());
    }
    packets
}

#[tokio::test]
async fn test_pcm_relay_numbers_output_independently() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frames = (0..10u64)
        .map(|i| AudioFrame::new(vec![i as i32; 48 * 2], 2, i, 0x5555))
        .collect();

    let packets = relay_pcm(frames, &listener).await;

    assert!(packets[0].marker);
    for (i, pair) in packets.windows(2).enumerate() {
        assert_eq!(pair[1].sequence_number, pair[0].sequence_number.wrapping_add(1));
        assert_eq!(pair[1].timestamp, pair[0].timestamp.wrapping_add(48));
        assert_eq!(pair[1].ssrc, pair[0].ssrc);
        assert_eq!(pair[1].payload_type, 97);
        assert_eq!(pair[1].payload.len(), 48 * 2 * 3);
        assert!(!pair[1].marker, "packet {}", i + 1);
    }
    assert_ne!(packets[0].ssrc, 0x5555);
}

#[tokio::test]
async fn test_restarted_output_has_fresh_origin() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = || vec![AudioFrame::new(vec![0; 96], 2, 0, 1)];

    let first = relay_pcm(frame(), &listener).await.remove(0);
    let second = relay_pcm(frame(), &listener).await.remove(0);

    assert_ne!(
        (first.sequence_number, first.timestamp, first.ssrc),
        (second.sequence_number, second.timestamp, second.ssrc)
    );
    assert!(second.marker);
}

#[tokio::test]
#[ignore = "needs multicast loopback on the host"]
async fn test_multicast_end_to_end() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let group = Ipv4Addr::new(239, 255, 77, 1);
    let port = 25004;

    let mut config = RelayConfig::default();
    config.input.multicast_address = group;
    config.input.port = port;
    config.input.format = InputFormat::Aes67;
    config.output.destination_port = listener.local_addr().unwrap().port();
    config.output.encoding = OutputEncoding::Pcm;
    config.tuning.interface = Ipv4Addr::LOCALHOST;

    let pipeline = Pipeline::new(config);
    let handle = pipeline.start().await.unwrap();
    assert_eq!(handle.state(), PipelineState::Running);

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for seq in 0..20u16 {
        sender
            .send_to(&aes67_packet(seq, 48, 9), (group, port))
            .await
            .unwrap();
    }

    let mut buf = [0u8; 2048];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let packet = RtpPacket::parse(&buf[..n]).unwrap();
    assert_eq!(packet.payload_type, 97);

    handle.stop().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

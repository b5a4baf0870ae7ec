//! Network subsystem for multicast RTP input and paced RTP output

pub mod receiver;
pub mod session;
pub mod transmitter;
pub mod udp;

pub use receiver::{run_receive_loop, StreamReceiver};
pub use session::{SequenceOutcome, SessionTable, StreamSession};
pub use transmitter::{run_transmit_loop, OutputStream, Pacer, RtpTransmitter};
pub use udp::{create_multicast_socket, create_send_socket};

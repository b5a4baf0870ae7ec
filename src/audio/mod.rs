//! Audio subsystem: frames, sample conversion, hand-off queues, processing

pub mod frame;
pub mod pcm;
pub mod processor;
pub mod queue;

pub use frame::AudioFrame;
pub use processor::{run_process_loop, AudioProcessor, OutputUnit};
pub use queue::{create_shared_queue, FrameQueue, SharedQueue};

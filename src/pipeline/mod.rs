//! Pipeline lifecycle, orchestration and counters

pub mod orchestrator;
pub mod state;
pub mod stats;

pub use orchestrator::{start, Pipeline, PipelineHandle};
pub use state::{PipelineState, StateMachine};
pub use stats::{RelayStats, StatsSnapshot};

//! Pipeline orchestrator
//!
//! Acquires every resource up front, then runs receiver → processor →
//! transmitter as three tasks joined by drop-oldest queues. A supervisor task
//! owns the lifecycle after start: it logs stats, reacts to escalated faults
//! and drives the graceful drain on stop.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{create_shared_queue, run_process_loop, AudioProcessor};
use crate::config::RelayConfig;
use crate::error::{Error, NetworkError, PipelineError, Result};
use crate::network::{
    create_multicast_socket, create_send_socket, run_receive_loop, run_transmit_loop,
    OutputStream, RtpTransmitter, StreamReceiver,
};
use crate::pipeline::state::{wait_terminal, PipelineState, StateMachine};
use crate::pipeline::stats::{RelayStats, StatsSnapshot};

/// Fatal faults a stage may report before the supervisor picks them up
const FAULT_CHANNEL_CAPACITY: usize = 4;

/// State shared between the pipeline, its handle and the supervisor
struct Shared {
    id: Uuid,
    state: StateMachine,
    stats: Arc<RelayStats>,
    fault: Mutex<Option<(&'static str, String)>>,
}

impl Shared {
    fn transition(&self, to: PipelineState) {
        match self.state.transition(to) {
            Ok(from) => tracing::info!("Pipeline {}: {} -> {}", self.id, from, to),
            Err(e) => tracing::warn!("Pipeline {}: {}", self.id, e),
        }
    }

    fn record_fault(&self, stage: &'static str, reason: String) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some((stage, reason));
        }
    }

    fn fault_error(&self) -> Option<Error> {
        self.fault.lock().as_ref().map(|(stage, reason)| {
            Error::Pipeline(PipelineError::StageFault {
                stage: *stage,
                reason: reason.clone(),
            })
        })
    }
}

/// One relay instance, from configuration to its running stages
///
/// A pipeline runs at most once. Restarting the relay means building a new
/// pipeline, which also gives the output stream a fresh origin.
pub struct Pipeline {
    config: RelayConfig,
    shared: Arc<Shared>,
}

impl Pipeline {
    /// Create an idle pipeline. The configuration is assumed validated.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                state: StateMachine::new(),
                stats: Arc::new(RelayStats::new()),
                fault: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.current()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Acquire sockets and codec state, then start all stages.
    ///
    /// Any acquisition failure leaves the pipeline `Faulted` and is returned;
    /// nothing is retried.
    pub async fn start(&self) -> Result<PipelineHandle> {
        self.shared.state.transition(PipelineState::Starting)?;
        tracing::info!(
            "Pipeline {}: starting {} {}:{} -> {:?} {}:{}",
            self.shared.id,
            self.config.input.format.name(),
            self.config.input.multicast_address,
            self.config.input.port,
            self.config.output.encoding,
            self.config.output.destination_address,
            self.config.output.destination_port
        );

        let resources = match acquire(&self.config) {
            Ok(resources) => resources,
            Err(e) => {
                tracing::error!("Pipeline {}: start failed: {}", self.shared.id, e);
                self.shared.record_fault("startup", e.to_string());
                self.shared.transition(PipelineState::Faulted);
                return Err(e);
            }
        };

        self.shared.transition(PipelineState::Running);
        Ok(self.launch(resources))
    }

    fn launch(&self, resources: Resources) -> PipelineHandle {
        let tuning = &self.config.tuning;
        let stats = self.shared.stats.clone();
        let started_at = Utc::now();

        let frames = create_shared_queue(tuning.queue_capacity);
        let units = create_shared_queue(tuning.queue_capacity);

        // `abort` stops every stage at once; `shutdown` only stops the
        // receiver so the rest of the pipeline can drain.
        let abort = CancellationToken::new();
        let shutdown = abort.child_token();
        let (fault_tx, fault_rx) = mpsc::channel(FAULT_CHANNEL_CAPACITY);

        let receiver = StreamReceiver::new(
            self.config.input.format,
            tuning.channels,
            tuning.session_idle_timeout(),
            stats.clone(),
        );
        let stream = OutputStream::new(resources.destination, self.config.output.encoding);
        let transmitter = RtpTransmitter::new(
            resources.send_socket,
            stream,
            tuning.send_retry_budget,
            tuning.send_backoff(),
            stats.clone(),
        );

        let stages = vec![
            (
                "receiver",
                tokio::spawn(run_receive_loop(
                    receiver,
                    resources.recv_socket,
                    frames.clone(),
                    shutdown.clone(),
                    tuning.recv_retry_budget,
                    fault_tx.clone(),
                )),
            ),
            (
                "processor",
                tokio::spawn(run_process_loop(
                    resources.processor,
                    frames,
                    units.clone(),
                    abort.clone(),
                    stats.clone(),
                )),
            ),
            (
                "transmitter",
                tokio::spawn(run_transmit_loop(transmitter, units, abort.clone(), fault_tx)),
            ),
        ];

        let supervisor = tokio::spawn(supervise(Supervisor {
            shared: self.shared.clone(),
            stages,
            faults: fault_rx,
            shutdown: shutdown.clone(),
            abort: abort.clone(),
            grace: tuning.shutdown_grace(),
            stats_interval: tuning.stats_interval(),
            started_at,
        }));

        PipelineHandle {
            shared: self.shared.clone(),
            shutdown,
            abort,
            supervisor: Some(supervisor),
            started_at,
        }
    }
}

/// Build and start a pipeline in one step
pub async fn start(config: RelayConfig) -> Result<PipelineHandle> {
    Pipeline::new(config).start().await
}

/// Everything a running pipeline owns, acquired before any stage runs
struct Resources {
    processor: AudioProcessor,
    recv_socket: UdpSocket,
    send_socket: UdpSocket,
    destination: SocketAddr,
}

fn acquire(config: &RelayConfig) -> Result<Resources> {
    let processor = AudioProcessor::from_config(config)?;

    let destination_ip = config.destination_ip().map_err(|_| {
        NetworkError::InvalidDestination(config.output.destination_address.clone())
    })?;
    let destination = SocketAddr::new(destination_ip, config.output.destination_port);

    let recv_socket = create_multicast_socket(
        config.input.multicast_address,
        config.input.port,
        config.tuning.interface,
    )?;
    let send_socket = create_send_socket(destination, config.tuning.multicast_ttl)?;

    Ok(Resources {
        processor,
        recv_socket,
        send_socket,
        destination,
    })
}

struct Supervisor {
    shared: Arc<Shared>,
    stages: Vec<(&'static str, JoinHandle<()>)>,
    faults: mpsc::Receiver<PipelineError>,
    shutdown: CancellationToken,
    abort: CancellationToken,
    grace: Duration,
    stats_interval: Duration,
    started_at: DateTime<Utc>,
}

async fn supervise(mut sv: Supervisor) {
    let mut ticker = interval_at(Instant::now() + sv.stats_interval, sv.stats_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let fault = loop {
        tokio::select! {
            Some(fault) = sv.faults.recv() => break Some(fault),
            _ = sv.shutdown.cancelled() => break None,
            _ = ticker.tick() => sv.shared.stats.snapshot(sv.started_at).log(),
        }
    };

    match fault {
        Some(fault) => {
            tracing::error!("Pipeline {}: {}", sv.shared.id, fault);
            let (stage, reason) = match fault {
                PipelineError::StageFault { stage, reason } => (stage, reason),
                other => ("pipeline", other.to_string()),
            };
            sv.shared.record_fault(stage, reason);
            sv.shared.transition(PipelineState::Faulted);
            sv.abort.cancel();
            join_stages(&sv.shared, &mut sv.stages, sv.grace).await;
        }
        None => {
            sv.shared.transition(PipelineState::Stopping);
            join_stages(&sv.shared, &mut sv.stages, sv.grace).await;
            sv.abort.cancel();

            // Stages may still escalate while draining; the stop stands
            while let Ok(late) = sv.faults.try_recv() {
                tracing::warn!("Pipeline {}: during shutdown: {}", sv.shared.id, late);
            }
            sv.shared.transition(PipelineState::Stopped);
        }
    }

    tracing::info!("Pipeline {}: final report", sv.shared.id);
    sv.shared.stats.snapshot(sv.started_at).log();
}

/// Wait for every stage to exit within `grace`, then force-release the rest
async fn join_stages(
    shared: &Shared,
    stages: &mut [(&'static str, JoinHandle<()>)],
    grace: Duration,
) {
    let deadline = Instant::now() + grace;
    for (name, handle) in stages.iter_mut() {
        match timeout(deadline.saturating_duration_since(Instant::now()), &mut *handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Pipeline {}: {} task failed: {}", shared.id, name, e),
            Err(_) => {
                tracing::warn!(
                    "Pipeline {}: {}, aborting",
                    shared.id,
                    PipelineError::ShutdownTimeout(*name)
                );
                handle.abort();
                let _ = (&mut *handle).await;
            }
        }
    }
}

/// Control surface of a started pipeline
pub struct PipelineHandle {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    abort: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

impl PipelineHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.current()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    /// Current counters
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot(self.started_at)
    }

    /// The escalated fault that ended the pipeline, if any
    pub fn fault(&self) -> Option<String> {
        self.shared
            .fault
            .lock()
            .as_ref()
            .map(|(stage, reason)| format!("{}: {}", stage, reason))
    }

    /// Wait until the pipeline reaches `Stopped` or `Faulted`
    pub async fn wait(&self) -> PipelineState {
        wait_terminal(self.subscribe()).await
    }

    /// Stop the pipeline and wait for every stage to exit.
    ///
    /// Returns the escalated fault if the pipeline had already faulted.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                tracing::error!("Pipeline {}: supervisor failed: {}", self.shared.id, e);
                self.abort.cancel();
            }
        }

        match self.shared.fault_error() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        // Dropping without stop() tears everything down without draining
        if self.supervisor.is_some() {
            self.abort.cancel();
        }
    }
}

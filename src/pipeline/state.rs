//! Pipeline lifecycle state machine

use tokio::sync::watch;

use crate::error::PipelineError;

/// Pipeline lifecycle state
///
/// ```text
/// Idle → Starting → Running → Stopping → Stopped
///           │          │
///           └──────────┴──→ Faulted
/// ```
///
/// `Stopped` and `Faulted` are terminal; a stopped relay is restarted by
/// building a new pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Built, nothing acquired
    Idle,

    /// Acquiring sockets and codec state
    Starting,

    /// All stages running
    Running,

    /// Input closed, downstream stages draining
    Stopping,

    /// All stages exited and released their resources
    Stopped,

    /// Start failed or a stage escalated a fatal fault
    Faulted,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, target),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Faulted)
                | (Running, Stopping)
                | (Running, Faulted)
                | (Stopping, Stopped)
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Starting => "Starting",
            PipelineState::Running => "Running",
            PipelineState::Stopping => "Stopping",
            PipelineState::Stopped => "Stopped",
            PipelineState::Faulted => "Faulted",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running)
    }

    /// No further transitions possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Faulted)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Current state plus change notification for observers
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<PipelineState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PipelineState::Idle);
        Self { tx }
    }

    pub fn current(&self) -> PipelineState {
        *self.tx.borrow()
    }

    /// Move to `to` if the transition is valid. Returns the previous state.
    pub fn transition(&self, to: PipelineState) -> Result<PipelineState, PipelineError> {
        let mut result = Ok(to);
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(&to) {
                result = Ok(*state);
                *state = to;
                true
            } else {
                result = Err(PipelineError::InvalidTransition { from: *state, to });
                false
            }
        });
        result
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the observed state is terminal and return it
pub async fn wait_terminal(mut rx: watch::Receiver<PipelineState>) -> PipelineState {
    loop {
        let state = *rx.borrow_and_update();
        if state.is_terminal() {
            return state;
        }
        if rx.changed().await.is_err() {
            // Machine dropped; the last value is final
            return *rx.borrow();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn test_happy_path_transitions() {
        let machine = StateMachine::new();
        assert_eq!(machine.transition(Starting).unwrap(), Idle);
        assert_eq!(machine.transition(Running).unwrap(), Starting);
        assert_eq!(machine.transition(Stopping).unwrap(), Running);
        assert_eq!(machine.transition(Stopped).unwrap(), Stopping);
        assert!(machine.current().is_terminal());
    }

    #[test]
    fn test_faulted_reachable_only_while_live() {
        assert!(Starting.can_transition_to(&Faulted));
        assert!(Running.can_transition_to(&Faulted));
        assert!(!Idle.can_transition_to(&Faulted));
        assert!(!Stopped.can_transition_to(&Faulted));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [Stopped, Faulted] {
            for to in [Idle, Starting, Running, Stopping, Stopped, Faulted] {
                assert!(!from.can_transition_to(&to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let machine = StateMachine::new();
        let err = machine.transition(Running).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition { from: Idle, to: Running }
        ));
        assert_eq!(machine.current(), Idle);
    }

    #[tokio::test]
    async fn test_wait_terminal_observes_fault() {
        let machine = StateMachine::new();
        let rx = machine.subscribe();
        machine.transition(Starting).unwrap();

        let waiter = tokio::spawn(wait_terminal(rx));
        machine.transition(Faulted).unwrap();
        assert_eq!(waiter.await.unwrap(), Faulted);
    }
}

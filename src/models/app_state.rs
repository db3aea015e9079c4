use std::fmt;

/// Identifier of one Nettest run, unique within a session.
pub type RunId = u64;

/// Run state guarding the start control.
///
/// There is at most one active run per session. The start control is enabled
/// exactly when the state is [`RunState::Idle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running {
        run_id: RunId,
    },
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }
}

/// Terminal state of a run.
///
/// Every variant is reported to the UI the same way: the completion
/// notification re-enables the start control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The engine drained its event stream normally
    Completed,
    /// The engine failed to start or its stream failed mid-run
    EngineFailed(String),
    /// An event could not be decoded; consumption stopped there
    DecodeFailed(String),
    /// The run never reached the engine (provisioning or configuration)
    Aborted(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::EngineFailed(msg) => write!(f, "engine failed: {}", msg),
            RunOutcome::DecodeFailed(msg) => write!(f, "event decode failed: {}", msg),
            RunOutcome::Aborted(msg) => write!(f, "aborted: {}", msg),
        }
    }
}

/// Single source of truth for session state.
///
/// Display buffers are not part of this struct; they live in the UI sink and
/// are only touched on the UI thread.
///
/// # Thread Safety
///
/// `AppState` is wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`].
/// Never mutate it directly - use the manager's transition methods so change
/// events are emitted.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    pub run_state: RunState,

    /// Id handed to the next run
    pub next_run_id: RunId,

    // Session counters
    pub runs_started: usize,
    pub runs_succeeded: usize,
    pub runs_failed: usize,

    pub last_outcome: Option<RunOutcome>,
}

impl AppState {
    /// Whether the start control should currently be enabled
    pub fn can_start(&self) -> bool {
        !self.run_state.is_running()
    }

    pub fn active_run(&self) -> Option<RunId> {
        match self.run_state {
            RunState::Running { run_id } => Some(run_id),
            RunState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        let state = AppState::default();
        assert_eq!(state.run_state, RunState::Idle);
        assert!(state.can_start());
        assert_eq!(state.active_run(), None);
    }

    #[test]
    fn test_running_state_blocks_start() {
        let state = AppState {
            run_state: RunState::Running { run_id: 3 },
            ..AppState::default()
        };
        assert!(!state.can_start());
        assert_eq!(state.active_run(), Some(3));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RunOutcome::Completed.to_string(), "completed");
        assert!(RunOutcome::Completed.is_success());
        assert_eq!(
            RunOutcome::EngineFailed("exit 2".into()).to_string(),
            "engine failed: exit 2"
        );
        assert!(!RunOutcome::Aborted("x".into()).is_success());
    }
}

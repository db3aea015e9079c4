// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>> and emits change events when the run state machine moves.

use crate::models::{AppState, RunId, RunOutcome, RunState};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Change events emitted when state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A run left `Idle`
    RunStarted { run_id: RunId },

    /// A run returned to `Idle`
    RunFinished { run_id: RunId, outcome: RunOutcome },
}

impl StateChange {
    /// One-line status shown next to the start control
    pub fn status_line(&self) -> String {
        match self {
            StateChange::RunStarted { run_id } => format!("run {}: running", run_id),
            StateChange::RunFinished { run_id, outcome } => format!("run {}: {}", run_id, outcome),
        }
    }
}

/// Rejected state transitions
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("a run is already active (run {0})")]
    AlreadyRunning(RunId),
}

/// Thread-safe run state machine with event emission
///
/// `Idle → Running` happens only through [`try_begin_run`](Self::try_begin_run),
/// `Running → Idle` only through [`finish_run`](Self::finish_run), which accepts
/// each run id once.
///
/// # Related Types
///
/// - [`crate::models::AppState`]: The underlying state structure
/// - [`StateChange`]: Event types emitted on transitions
/// - [`crate::services::NettestRunner`]: Drives the transitions
pub struct StateManager {
    /// The application state protected by RwLock for thread-safe access
    state: Arc<RwLock<AppState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    /// Get a read-only snapshot of the current state
    pub fn snapshot(&self) -> AppState {
        self.read(|s| s.clone())
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let can_start = state_manager.read(|state| state.can_start());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Subscribe to state change events
    ///
    /// Returns a receiver that will get notified of all future state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Move `Idle → Running`.
    ///
    /// # Errors
    /// [`StateError::AlreadyRunning`] if a run is active; the state is left
    /// untouched.
    pub fn try_begin_run(&self) -> Result<RunId, StateError> {
        let run_id = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if let Some(active) = state.active_run() {
                return Err(StateError::AlreadyRunning(active));
            }

            let run_id = state.next_run_id;
            state.next_run_id += 1;
            state.runs_started += 1;
            state.run_state = RunState::Running { run_id };
            run_id
        };

        tracing::debug!("Run {} started", run_id);
        self.emit(StateChange::RunStarted { run_id });
        Ok(run_id)
    }

    /// Move `Running → Idle` for `run_id`.
    ///
    /// Returns `false` without changing anything when `run_id` is not the
    /// active run, so a duplicate completion cannot double-count.
    pub fn finish_run(&self, run_id: RunId, outcome: RunOutcome) -> bool {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state.active_run() != Some(run_id) {
                tracing::warn!(
                    "Ignoring completion for run {} (active: {:?})",
                    run_id,
                    state.active_run()
                );
                return false;
            }

            state.run_state = RunState::Idle;
            if outcome.is_success() {
                state.runs_succeeded += 1;
            } else {
                state.runs_failed += 1;
            }
            state.last_outcome = Some(outcome.clone());
        }

        tracing::debug!("Run {} finished: {}", run_id, outcome);
        self.emit(StateChange::RunFinished { run_id, outcome });
        true
    }

    fn emit(&self, change: StateChange) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.state_tx.send(change);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

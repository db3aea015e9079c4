// Event dispatch - routes decoded engine events to display handlers
//
// The routing is a table keyed by EventKind, filled at registration time.
// Handlers never run on the producing thread: dispatch() packages the payload
// into a UiUpdate and hands it to a UiThread.

use crate::models::{EventKind, EventPayload, LogSeverity, RunId, RunOutcome, format_progress};
use crate::state::StateManager;
use crate::ui::bridge::UiThread;
use crate::ui::display::DisplaySink;
use std::collections::HashMap;
use std::sync::Arc;

/// Handler for one event kind, run on the UI thread
pub type EventHandler<S> = Arc<dyn Fn(&S, &EventPayload) + Send + Sync>;

/// Routes events to per-kind handlers on the UI thread.
///
/// Holds no state besides the handler table, so one dispatcher can serve any
/// number of consecutive runs.
pub struct EventDispatcher<S> {
    handlers: HashMap<EventKind, EventHandler<S>>,
}

impl<S: 'static> EventDispatcher<S> {
    /// Dispatcher with no handlers; every event is ignored
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Set the handler for `kind`, replacing any previous one
    pub fn register<F>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: Fn(&S, &EventPayload) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Queue the handler for `kind` with `payload` on the UI thread.
    ///
    /// Returns `false` when no handler is registered; the event is logged and
    /// dropped, never treated as an error.
    pub fn dispatch(&self, kind: EventKind, payload: EventPayload, ui: &dyn UiThread<S>) -> bool {
        let Some(handler) = self.handlers.get(&kind) else {
            tracing::info!("Unhandled event ({}): {:?}", kind, payload);
            return false;
        };

        tracing::debug!("Dispatching {} event", kind);
        let handler = Arc::clone(handler);
        ui.update_ui(Box::new(move |sink: &S| handler(sink, &payload)));
        true
    }

    /// Deliver the single end-of-run notification.
    ///
    /// On the UI thread this moves the state machine back to `Idle` and then
    /// runs the `TestComplete` handler. The handler runs only if the transition
    /// was accepted, so a run can never be completed twice.
    pub fn complete(
        &self,
        ui: &dyn UiThread<S>,
        state: Arc<StateManager>,
        run_id: RunId,
        outcome: RunOutcome,
    ) {
        let handler = self.handlers.get(&EventKind::TestComplete).cloned();
        ui.update_ui(Box::new(move |sink: &S| {
            finish(sink, &state, run_id, outcome, handler.as_ref());
        }));
    }

    /// [`complete`](Self::complete) for callers already on the UI thread
    pub fn complete_now(&self, sink: &S, state: &StateManager, run_id: RunId, outcome: RunOutcome) {
        let handler = self.handlers.get(&EventKind::TestComplete);
        finish(sink, state, run_id, outcome, handler);
    }
}

impl<S: 'static> Default for EventDispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DisplaySink> EventDispatcher<S> {
    /// Dispatcher with the standard display handlers registered
    pub fn for_display() -> Self {
        let mut dispatcher = Self::new();
        dispatcher
            .register(EventKind::Log, |sink: &S, payload: &EventPayload| {
                if let EventPayload::Log { severity, message } = payload {
                    mirror_engine_log(*severity, message);
                    sink.append_log(&format!("{}\n", message));
                }
            })
            .register(EventKind::Progress, |sink: &S, payload: &EventPayload| {
                if let EventPayload::Progress {
                    percentage,
                    message,
                } = payload
                {
                    sink.append_progress(&format!("{}\n", format_progress(*percentage, message)));
                }
            })
            .register(EventKind::MeasurementResult, |sink: &S, payload: &EventPayload| {
                if let EventPayload::MeasurementResult { result_json } = payload {
                    sink.set_result(&format!("{}\n", result_json));
                }
            })
            .register(EventKind::PerformanceUpdate, |sink: &S, payload: &EventPayload| {
                if let EventPayload::PerformanceUpdate { raw } = payload {
                    sink.set_progress(&format!("{}\n", raw));
                }
            })
            .register(EventKind::Failure, |sink: &S, payload: &EventPayload| {
                if let EventPayload::Failure { failure } = payload {
                    sink.append_log(&format!("failure: {}\n", failure));
                }
            })
            .register(EventKind::TestComplete, |sink: &S, _payload: &EventPayload| {
                sink.set_start_enabled(true);
            });
        dispatcher
    }
}

fn finish<S>(
    sink: &S,
    state: &StateManager,
    run_id: RunId,
    outcome: RunOutcome,
    handler: Option<&EventHandler<S>>,
) {
    if !state.finish_run(run_id, outcome) {
        return;
    }
    if let Some(handler) = handler {
        handler(sink, &EventPayload::TestComplete);
    }
}

fn mirror_engine_log(severity: LogSeverity, message: &str) {
    match severity.verbosity() {
        0 => tracing::error!(target: "engine", "{}", message),
        1 => tracing::warn!(target: "engine", "{}", message),
        2 => tracing::info!(target: "engine", "{}", message),
        _ => tracing::debug!(target: "engine", "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::bridge::UiQueue;
    use crate::ui::display::TextDisplay;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn log(message: &str) -> EventPayload {
        EventPayload::Log {
            severity: LogSeverity::INFO,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_handlers_run_only_when_pumped() {
        let dispatcher = EventDispatcher::<TextDisplay>::for_display();
        let (mut queue, handle) = UiQueue::<TextDisplay>::new();
        let display = TextDisplay::new();

        assert!(dispatcher.dispatch(EventKind::Log, log("starting"), &handle));
        assert_eq!(display.log_text(), "");

        queue.pump(&display);
        assert_eq!(display.log_text(), "starting\n");
    }

    #[test]
    fn test_standard_handlers() {
        let dispatcher = EventDispatcher::<TextDisplay>::for_display();
        let (mut queue, handle) = UiQueue::<TextDisplay>::new();
        let display = TextDisplay::new();

        dispatcher.dispatch(
            EventKind::Progress,
            EventPayload::Progress {
                percentage: 0.5,
                message: "halfway".into(),
            },
            &handle,
        );
        dispatcher.dispatch(
            EventKind::MeasurementResult,
            EventPayload::MeasurementResult {
                result_json: "{...}".into(),
            },
            &handle,
        );
        dispatcher.dispatch(
            EventKind::Failure,
            EventPayload::Failure {
                failure: "generic_timeout_error".into(),
            },
            &handle,
        );
        queue.pump(&display);

        assert_eq!(display.progress_text(), "50% halfway\n");
        assert_eq!(display.result_text(), "{...}\n");
        assert_eq!(display.log_text(), "failure: generic_timeout_error\n");

        dispatcher.dispatch(
            EventKind::PerformanceUpdate,
            EventPayload::PerformanceUpdate { raw: "{\"k\":1}".into() },
            &handle,
        );
        queue.pump(&display);
        assert_eq!(display.progress_text(), "{\"k\":1}\n");
    }

    #[test]
    fn test_unknown_kind_is_ignored() {
        let dispatcher = EventDispatcher::<TextDisplay>::for_display();
        let (mut queue, handle) = UiQueue::<TextDisplay>::new();
        let display = TextDisplay::new();

        let routed = dispatcher.dispatch(
            EventKind::Unknown,
            EventPayload::Unknown {
                key: Some("status.geoip_lookup".into()),
                raw: "{}".into(),
            },
            &handle,
        );

        assert!(!routed);
        assert_eq!(queue.pump(&display), 0);
    }

    #[test]
    fn test_register_replaces_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::<TextDisplay>::for_display();
        let c = Arc::clone(&counter);
        dispatcher.register(EventKind::Log, move |_sink: &TextDisplay, _p: &EventPayload| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let (mut queue, handle) = UiQueue::<TextDisplay>::new();
        let display = TextDisplay::new();
        dispatcher.dispatch(EventKind::Log, log("x"), &handle);
        queue.pump(&display);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(display.log_text(), "");
    }

    #[test]
    fn test_complete_fires_once_per_run() {
        let dispatcher = EventDispatcher::<TextDisplay>::for_display();
        let state = Arc::new(StateManager::new());
        let (mut queue, handle) = UiQueue::<TextDisplay>::new();
        let display = TextDisplay::new();

        let run_id = state.try_begin_run().unwrap();
        display.set_start_enabled(false);

        dispatcher.complete(&handle, Arc::clone(&state), run_id, RunOutcome::Completed);
        dispatcher.complete(&handle, Arc::clone(&state), run_id, RunOutcome::Completed);
        assert!(!display.start_enabled());

        assert_eq!(queue.pump(&display), 2);
        assert!(display.start_enabled());
        assert_eq!(state.read(|s| s.runs_succeeded), 1);
        assert!(state.read(|s| s.can_start()));
    }
}

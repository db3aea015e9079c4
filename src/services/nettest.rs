use crate::metrics::Metrics;
use crate::models::{AppConfig, Event, EventKind, LogLevel, NettestSection, RunId, RunOutcome, Settings};
use crate::services::engine::{Engine, EngineError, Polled};
use crate::services::options::{ConfigurationError, SettingsBuilder};
use crate::services::resources::{ProvisioningError, ResourceBundle, ResourceProvisioner};
use crate::state::{StateError, StateManager};
use crate::ui::bridge::UiThread;
use crate::ui::dispatch::EventDispatcher;
use crate::ui::display::DisplaySink;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Which test to run and how
#[derive(Debug, Clone, PartialEq)]
pub struct NettestProfile {
    pub name: String,
    pub log_level: LogLevel,
    pub no_file_report: bool,
    pub dns_engine: Option<String>,
    pub use_ca_bundle: bool,
}

impl From<&NettestSection> for NettestProfile {
    fn from(section: &NettestSection) -> Self {
        Self {
            name: section.name.clone(),
            log_level: section.log_level,
            no_file_report: section.no_file_report,
            dns_engine: section.dns_engine.clone(),
            use_ca_bundle: section.use_ca_bundle,
        }
    }
}

impl Default for NettestProfile {
    fn default() -> Self {
        Self::from(&NettestSection::default())
    }
}

/// Reasons a run did not reach the worker thread
#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    AlreadyRunning(#[from] StateError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to spawn worker thread: {0}")]
    Worker(#[source] std::io::Error),
}

/// Starts Nettests and relays their events to a display.
///
/// `start` is called on the UI thread. It moves the state machine to
/// `Running`, disables the start control, clears the display, prepares the
/// settings and hands the run to a dedicated worker thread. Whatever happens
/// afterwards, the worker ends with exactly one completion notification,
/// which re-enables the start control.
///
/// There is no cancellation: a started run always runs to a terminal state.
pub struct NettestRunner<S> {
    engine: Arc<dyn Engine>,
    provisioner: ResourceProvisioner,
    bundle: ResourceBundle,
    profile: NettestProfile,
    dispatcher: Arc<EventDispatcher<S>>,
    state: Arc<StateManager>,
    metrics: Arc<Metrics>,
    poll_timeout: Duration,
}

impl<S: DisplaySink> NettestRunner<S> {
    pub fn new(
        engine: Arc<dyn Engine>,
        provisioner: ResourceProvisioner,
        bundle: ResourceBundle,
        profile: NettestProfile,
        state: Arc<StateManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            engine,
            provisioner,
            bundle,
            profile,
            dispatcher: Arc::new(EventDispatcher::for_display()),
            state,
            metrics,
            poll_timeout: Duration::from_millis(crate::models::EngineConfig::DEFAULT_POLL_TIMEOUT_MS),
        }
    }

    /// Runner wired from the application configuration
    pub fn from_config(
        config: &AppConfig,
        engine: Arc<dyn Engine>,
        state: Arc<StateManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let profile = NettestProfile::from(&config.nettest);
        let bundle = ResourceBundle::from_dir(&config.resources.bundle_dir, profile.use_ca_bundle);
        Self::new(
            engine,
            ResourceProvisioner::new(config.resources.storage_dir.clone()),
            bundle,
            profile,
            state,
            metrics,
        )
        .with_poll_timeout(config.engine.poll_timeout())
    }

    /// Replace the standard display handlers
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher<S>) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn profile(&self) -> &NettestProfile {
        &self.profile
    }

    pub fn engine_version(&self) -> String {
        self.engine.version()
    }

    /// Provision resources and build the settings document for one run
    pub fn prepare_settings(&self) -> Result<Settings, StartError> {
        let paths = self.provisioner.provision_bundle(&self.bundle)?;

        let settings = SettingsBuilder::new(self.profile.name.clone())
            .log_level(self.profile.log_level)
            .geoip_country_path(&paths.geoip_country_path)
            .geoip_asn_path(&paths.geoip_asn_path)
            .ca_bundle_path(paths.ca_bundle_path.as_ref())
            .no_file_report(self.profile.no_file_report)
            .dns_engine(self.profile.dns_engine.clone())
            .build()?;

        Ok(settings)
    }

    /// Start a run. Must be called on the thread that owns `ui`.
    ///
    /// # Errors
    /// - [`StartError::AlreadyRunning`] if a run is active; nothing changes.
    /// - Provisioning, configuration and worker spawn failures: the run is
    ///   finished as [`RunOutcome::Aborted`], the diagnostic is appended to
    ///   the log and the start control is enabled again before returning.
    pub fn start(&self, ui: &S, ui_thread: Arc<dyn UiThread<S>>) -> Result<RunId, StartError> {
        let run_id = self.state.try_begin_run()?;
        self.metrics.record_run_started();
        let started_at = Instant::now();

        ui.set_start_enabled(false);
        ui.clear();

        let settings = match self.prepare_settings() {
            Ok(settings) => settings,
            Err(e) => {
                self.abort(ui, run_id, &e, started_at);
                return Err(e);
            }
        };

        tracing::info!(
            "Starting {} (run {}, log level {})",
            settings.name,
            run_id,
            settings.log_level
        );

        let worker = RunWorker {
            engine: Arc::clone(&self.engine),
            dispatcher: Arc::clone(&self.dispatcher),
            ui_thread,
            state: Arc::clone(&self.state),
            metrics: Arc::clone(&self.metrics),
            poll_timeout: self.poll_timeout,
            run_id,
            settings,
            started_at,
        };

        let spawned = std::thread::Builder::new()
            .name(format!("nettest-run-{}", run_id))
            .spawn(move || worker.run());

        if let Err(e) = spawned {
            let error = StartError::Worker(e);
            self.abort(ui, run_id, &error, started_at);
            return Err(error);
        }

        Ok(run_id)
    }

    fn abort(&self, ui: &S, run_id: RunId, error: &StartError, started_at: Instant) {
        tracing::warn!("Run {} aborted before reaching the engine: {}", run_id, error);

        let outcome = RunOutcome::Aborted(error.to_string());
        self.metrics.record_outcome(&outcome, started_at.elapsed());
        ui.append_log(&format!("cannot start: {}\n", error));
        self.dispatcher.complete_now(ui, &self.state, run_id, outcome);
    }
}

/// Everything one run's worker thread owns
struct RunWorker<S> {
    engine: Arc<dyn Engine>,
    dispatcher: Arc<EventDispatcher<S>>,
    ui_thread: Arc<dyn UiThread<S>>,
    state: Arc<StateManager>,
    metrics: Arc<Metrics>,
    poll_timeout: Duration,
    run_id: RunId,
    settings: Settings,
    started_at: Instant,
}

impl<S: DisplaySink> RunWorker<S> {
    fn run(self) {
        // A panicking engine must not leave the run (and the start control) stuck
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.drain())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = format!("worker panicked: {}", panic_message(payload.as_ref()));
                tracing::error!("Run {}: {}", self.run_id, message);
                self.report(format!("engine error: {}\n", message));
                RunOutcome::EngineFailed(message)
            }
        };

        tracing::info!(
            "Run {} finished after {:.2}s: {}",
            self.run_id,
            self.started_at.elapsed().as_secs_f64(),
            outcome
        );
        self.metrics.record_outcome(&outcome, self.started_at.elapsed());

        self.dispatcher.complete(
            self.ui_thread.as_ref(),
            Arc::clone(&self.state),
            self.run_id,
            outcome,
        );
    }

    /// Consume the task's events until it finishes or the stream breaks
    fn drain(&self) -> RunOutcome {
        let mut task = match self.engine.start(&self.settings) {
            Ok(task) => task,
            Err(e) => return self.engine_failed(e),
        };

        let mut terminated = false;
        while !task.is_done() {
            match task.next_event(self.poll_timeout) {
                Ok(Polled::Event(raw)) => match Event::decode(&raw) {
                    Ok(event) if event.kind == EventKind::TestComplete => {
                        // Reported once, by complete(), after the stream ends
                        terminated = true;
                    }
                    Ok(event) => {
                        let routed =
                            self.dispatcher
                                .dispatch(event.kind, event.payload, self.ui_thread.as_ref());
                        self.metrics.record_event(routed);
                    }
                    Err(e) => {
                        tracing::warn!("Cannot decode event: {} (raw: {})", e, raw);
                        self.report(format!("cannot decode event: {}\n", e));
                        return RunOutcome::DecodeFailed(e.to_string());
                    }
                },
                Ok(Polled::Pending) => continue,
                Ok(Polled::Done) => break,
                Err(e) => return self.engine_failed(e),
            }
        }

        if !terminated {
            tracing::debug!("Run {} ended without a task_terminated event", self.run_id);
        }
        RunOutcome::Completed
    }

    fn engine_failed(&self, error: EngineError) -> RunOutcome {
        tracing::warn!("Engine error in run {}: {}", self.run_id, error);
        self.report(format!("engine error: {}\n", error));
        RunOutcome::EngineFailed(error.to_string())
    }

    /// Append a diagnostic line to the log region
    fn report(&self, line: String) {
        self.ui_thread
            .update_ui(Box::new(move |sink: &S| sink.append_log(&line)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

// GUI Controller - Bridges the Slint window with the Nettest runner
//
// The window is the display sink: the three text regions and the start
// button are Slint properties, mutated only on the event loop thread.
// Worker threads reach it through the EventLoopBridge.

use crate::services::nettest::{NettestRunner, StartError};
use crate::state::StateManager;
use crate::ui::bridge::{EventLoopBridge, UiThread};
use crate::ui::display::DisplaySink;
use anyhow::{Context, Result};
use slint::ComponentHandle;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

// Include the generated Slint code
slint::include_modules!();

impl DisplaySink for MainWindow {
    fn append_log(&self, text: &str) {
        let mut log = self.get_log_text().to_string();
        log.push_str(text);
        self.set_log_text(log.into());
    }

    fn append_progress(&self, text: &str) {
        let mut progress = self.get_progress_text().to_string();
        progress.push_str(text);
        self.set_progress_text(progress.into());
    }

    fn set_progress(&self, text: &str) {
        self.set_progress_text(text.into());
    }

    fn set_result(&self, text: &str) {
        self.set_result_text(text.into());
    }

    fn set_start_enabled(&self, enabled: bool) {
        MainWindow::set_start_enabled(self, enabled);
    }

    fn start_enabled(&self) -> bool {
        self.get_start_enabled()
    }

    fn clear(&self) {
        self.set_result_text(Default::default());
        self.set_progress_text(Default::default());
        self.set_log_text(Default::default());
    }
}

/// GUI Controller that wires the Slint window to a [`NettestRunner`]
///
/// # Example
/// ```ignore
/// let runner = NettestRunner::from_config(&config, engine, state, metrics);
/// let controller = GuiController::new(runner)?;
/// controller.run()?;  // Blocks until window is closed
/// ```
pub struct GuiController {
    ui: MainWindow,

    /// Keeps the handler thread's channel open for the window's lifetime
    _bridge: EventLoopBridge<MainWindow>,
}

impl GuiController {
    pub fn new(runner: NettestRunner<MainWindow>) -> Result<Self> {
        let ui = MainWindow::new().context("Failed to create Slint UI")?;
        let bridge = EventLoopBridge::new(&ui);

        ui.set_engine_version(runner.engine_version().into());
        ui.set_test_name(runner.profile().name.clone().into());
        ui.set_start_enabled(runner.state().read(|s| s.can_start()));

        Self::setup_state_subscription(&bridge, runner.state());
        Self::setup_callbacks(&ui, &bridge, Arc::new(runner));

        tracing::info!("GUI controller initialized");

        Ok(Self {
            ui,
            _bridge: bridge,
        })
    }

    /// Run the GUI (blocks until window is closed)
    pub fn run(self) -> Result<(), slint::PlatformError> {
        tracing::info!("Starting GUI event loop");
        self.ui.run()
    }

    /// Mirror run transitions into the status line
    fn setup_state_subscription(
        bridge: &EventLoopBridge<MainWindow>,
        state_manager: &Arc<StateManager>,
    ) {
        let bridge_handle = bridge.clone_handle();
        let mut rx = state_manager.subscribe();

        std::thread::spawn(move || {
            tracing::debug!("State subscription thread started");

            loop {
                match rx.blocking_recv() {
                    Ok(change) => {
                        tracing::trace!("State change received: {:?}", change);
                        let status = change.status_line();
                        bridge_handle.update_ui(Box::new(move |ui: &MainWindow| {
                            ui.set_status_text(status.into());
                        }));
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("State broadcast channel closed - stopping subscription");
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("State subscription lagged - {} changes skipped", skipped);
                    }
                }
            }

            tracing::debug!("State subscription thread terminated");
        });
    }

    fn setup_callbacks(
        ui: &MainWindow,
        bridge: &EventLoopBridge<MainWindow>,
        runner: Arc<NettestRunner<MainWindow>>,
    ) {
        let bridge_handle = bridge.clone_handle();
        let ui_weak = ui.as_weak();

        ui.on_start_nettest(move || {
            tracing::info!("Start button clicked");
            let Some(ui) = ui_weak.upgrade() else {
                return;
            };

            let ui_thread: Arc<dyn UiThread<MainWindow>> = Arc::new(bridge_handle.clone());
            match runner.start(&ui, ui_thread) {
                Ok(run_id) => tracing::info!("Run {} started", run_id),
                Err(StartError::AlreadyRunning(e)) => tracing::warn!("Start ignored: {}", e),
                Err(e) => tracing::error!("Cannot start run: {}", e),
            }
        });

        let ui_weak = ui.as_weak();
        ui.on_clear_display(move || {
            if let Some(ui) = ui_weak.upgrade() {
                DisplaySink::clear(&ui);
            }
        });
    }
}

//! mknettest - Runs one network measurement test and shows its events live
//!
//! Main entry point. It initializes:
//! - Configuration loading ([`ConfigManager`], `mknettest.yaml` + `MKNETTEST__*`)
//! - Logging infrastructure (file rotation + console output)
//! - A tokio runtime for engine subprocess I/O
//! - State management ([`StateManager`]) and session [`Metrics`]
//! - The front-end: a Slint window with the `gui` feature, otherwise a
//!   console session that runs the test once and prints the result
//!
//! # Usage
//!
//! ```text
//! mknettest [CONFIG_DIR] [--console]
//! ```
//!
//! `CONFIG_DIR` defaults to the current directory. `--console` forces the
//! console session in a `gui` build.

use anyhow::{Result, anyhow};
use mknettest::models::AppConfig;
use mknettest::services::{Engine, engine_from_config};
use mknettest::ui::{DisplaySink, TextDisplay, UiQueue};
use mknettest::{APP_NAME, ConfigManager, Metrics, NettestRunner, StateManager, VERSION};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let mut config_dir = String::from(".");
    let mut force_console = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--console" => force_console = true,
            _ => config_dir = arg,
        }
    }

    let config_manager = ConfigManager::new(config_dir.as_str())?;
    let wrote_default = !config_manager.app_config_path().exists();
    if wrote_default {
        config_manager.save_app_config(&AppConfig::default())?;
    }
    let config = config_manager.load_app_config()?;

    // Held until main returns so buffered log lines are flushed
    let _log_guard = mknettest::logging::setup_logging(&config.logging)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    if wrote_default {
        tracing::info!("Wrote default configuration to {}", config_manager.app_config_path());
    }

    // Engine subprocess I/O runs here; runs themselves get their own thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("mknettest-io")
        .build()?;

    let engine = engine_from_config(&config.engine, runtime.handle().clone())?;
    tracing::info!("Engine: {}", engine.version());

    let state_manager = Arc::new(StateManager::new());
    let metrics = Arc::new(Metrics::new());

    let result = if cfg!(feature = "gui") && !force_console {
        run_gui(&config, engine, Arc::clone(&state_manager), Arc::clone(&metrics))
    } else {
        run_console(&config, engine, Arc::clone(&state_manager), Arc::clone(&metrics))
    };

    if state_manager.read(|s| s.run_state.is_running()) {
        tracing::warn!("Exiting while a run is still active; its remaining events are dropped");
    }

    metrics.log_summary();
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Application shutdown complete");
    result
}

/// Run the test once, echoing log and progress lines as they arrive
fn run_console(
    config: &AppConfig,
    engine: Arc<dyn Engine>,
    state_manager: Arc<StateManager>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    let runner = NettestRunner::<TextDisplay>::from_config(
        config,
        engine,
        Arc::clone(&state_manager),
        metrics,
    );
    println!("{} v{} - engine {}", APP_NAME, VERSION, runner.engine_version());

    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new().with_echo(true);

    runner.start(&display, Arc::new(handle))?;
    queue.run_until(&display, |d| d.start_enabled());

    let result = display.result_text();
    if !result.is_empty() {
        println!("Result:\n{}", result);
    }

    match state_manager.read(|s| s.last_outcome.clone()) {
        Some(outcome) if outcome.is_success() => Ok(()),
        Some(outcome) => Err(anyhow!("{} {}", runner.profile().name, outcome)),
        None => Err(anyhow!("run ended without an outcome")),
    }
}

#[cfg(feature = "gui")]
fn run_gui(
    config: &AppConfig,
    engine: Arc<dyn Engine>,
    state_manager: Arc<StateManager>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    use mknettest::ui::GuiController;

    let runner = NettestRunner::from_config(config, engine, state_manager, metrics);
    let gui_controller = GuiController::new(runner)?;

    tracing::info!("GUI controller initialized, launching window");

    gui_controller.run().map_err(|e| {
        tracing::error!("GUI error: {}", e);
        anyhow!("GUI error: {}", e)
    })
}

#[cfg(not(feature = "gui"))]
fn run_gui(
    config: &AppConfig,
    engine: Arc<dyn Engine>,
    state_manager: Arc<StateManager>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    run_console(config, engine, state_manager, metrics)
}

//! Services module - Everything between the start button and the engine.
//!
//! The services are framework-agnostic: nothing here knows about Slint. The
//! display is reached only through [`crate::ui::DisplaySink`] and
//! [`crate::ui::UiThread`].
//!
//! # Components
//!
//! - [`ResourceProvisioner`]: Copies bundled GeoIP databases (and optionally
//!   a CA bundle) into application storage, once per installation.
//! - [`SettingsBuilder`]: Assembles the [`Settings`](crate::models::Settings)
//!   document for one run and validates it.
//! - [`Engine`] / [`TaskHandle`]: The measurement engine seam. A running task
//!   is polled for raw JSON events until it reports done.
//!   - [`ProcessEngine`]: an external program speaking JSON lines on stdio
//!   - [`ScriptedEngine`]: replays recorded events (demo and tests)
//! - [`NettestRunner`]: Orchestrates a run: state transition, provisioning,
//!   settings, then a worker thread that drains the task and dispatches
//!   events to the display.
//!
//! # Usage Example
//!
//! ```ignore
//! use mknettest::services::{NettestRunner, engine_from_config};
//!
//! let engine = engine_from_config(&config.engine, runtime.handle().clone())?;
//! let runner = NettestRunner::from_config(&config, engine, state, metrics);
//!
//! let (mut queue, handle) = UiQueue::new();
//! let display = TextDisplay::new();
//! runner.start(&display, Arc::new(handle))?;
//! queue.run_until(&display, |d| d.start_enabled());
//! ```

pub mod engine;
pub mod nettest;
pub mod options;
pub mod resources;

pub use engine::{
    Engine, EngineError, Polled, ProcessEngine, ScriptStep, ScriptedEngine, TaskHandle,
    engine_from_config,
};
pub use nettest::{NettestProfile, NettestRunner, StartError};
pub use options::{ConfigurationError, SettingsBuilder};
pub use resources::{
    BundledResource, ProvisionedResources, ProvisioningError, ResourceBundle, ResourceProvisioner,
    ResourceSource,
};

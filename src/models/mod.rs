//! Data models for the mknettest application.
//!
//! - [`Event`]: One decoded engine event ([`EventKind`] + [`EventPayload`])
//! - [`Settings`]: The settings document handed to the engine
//! - [`AppState`]: Run state machine and session counters
//! - [`AppConfig`]: Application configuration loaded from `mknettest.yaml`

pub mod app_state;
pub mod config;
pub mod event;
pub mod settings;

pub use app_state::{AppState, RunId, RunOutcome, RunState};
pub use config::{AppConfig, EngineConfig, LoggingSection, NettestSection, ResourcesSection};
pub use event::{Event, EventDecodeError, EventKind, EventPayload, LogSeverity, format_progress};
pub use settings::{LogLevel, OptionValue, Settings};

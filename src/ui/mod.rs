// UI module - Display state and the path events take to reach it
//
// This module contains:
// - bridge: delivers closures to the thread that owns the display
// - dispatch: routes decoded engine events to display handlers
// - display: the display sink trait and a headless text implementation
// - controller (feature "gui"): wires the Slint window to the runner

pub mod bridge;
pub mod dispatch;
pub mod display;

#[cfg(feature = "gui")]
pub mod controller;

pub use bridge::{UiQueue, UiQueueHandle, UiThread, UiUpdate};
pub use dispatch::{EventDispatcher, EventHandler};
pub use display::{DisplaySink, TextDisplay};

#[cfg(feature = "gui")]
pub use bridge::{EventLoopBridge, EventLoopBridgeHandle};
#[cfg(feature = "gui")]
pub use controller::{GuiController, MainWindow};

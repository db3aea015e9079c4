// Display sink - the three text regions and the start control
//
// Implementations are confined to the thread that owns the display. Nothing
// here is Send; updates from other threads go through a UiThread.

use std::cell::{Cell, RefCell};

/// Visible UI state mutated by delivered events
pub trait DisplaySink: 'static {
    fn append_log(&self, text: &str);
    fn append_progress(&self, text: &str);
    fn set_progress(&self, text: &str);
    fn set_result(&self, text: &str);
    fn set_start_enabled(&self, enabled: bool);
    fn start_enabled(&self) -> bool;

    /// Empty the result, progress and log regions
    fn clear(&self);
}

/// Headless display: plain text buffers, optionally echoed to stdout as they
/// change.
#[derive(Debug)]
pub struct TextDisplay {
    result: RefCell<String>,
    progress: RefCell<String>,
    log: RefCell<String>,
    start_enabled: Cell<bool>,
    echo: bool,
}

impl TextDisplay {
    pub fn new() -> Self {
        Self {
            result: RefCell::new(String::new()),
            progress: RefCell::new(String::new()),
            log: RefCell::new(String::new()),
            start_enabled: Cell::new(true),
            echo: false,
        }
    }

    /// Print every log and progress line as it arrives
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn result_text(&self) -> String {
        self.result.borrow().clone()
    }

    pub fn progress_text(&self) -> String {
        self.progress.borrow().clone()
    }

    pub fn log_text(&self) -> String {
        self.log.borrow().clone()
    }
}

impl Default for TextDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for TextDisplay {
    fn append_log(&self, text: &str) {
        if self.echo {
            print!("{}", text);
        }
        self.log.borrow_mut().push_str(text);
    }

    fn append_progress(&self, text: &str) {
        if self.echo {
            print!("{}", text);
        }
        self.progress.borrow_mut().push_str(text);
    }

    fn set_progress(&self, text: &str) {
        *self.progress.borrow_mut() = text.to_string();
    }

    fn set_result(&self, text: &str) {
        *self.result.borrow_mut() = text.to_string();
    }

    fn set_start_enabled(&self, enabled: bool) {
        self.start_enabled.set(enabled);
    }

    fn start_enabled(&self) -> bool {
        self.start_enabled.get()
    }

    fn clear(&self) {
        self.result.borrow_mut().clear();
        self.progress.borrow_mut().clear();
        self.log.borrow_mut().clear();
    }
}

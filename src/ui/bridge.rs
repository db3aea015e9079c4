// UI bridge - Delivers closures to the thread that owns the display
//
// Events are produced on a worker thread but the display may only be touched
// by its owning thread. Everything that crosses over is boxed into a UiUpdate
// and queued; the owning thread runs the updates in the order they were
// queued. Updates are never dropped or coalesced.
//
// Two owners exist:
// - UiQueue: a plain queue drained by whoever owns the display (console
//   session, tests)
// - EventLoopBridge (feature "gui"): forwards into Slint's event loop

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A display mutation to run on the owning thread
pub type UiUpdate<S> = Box<dyn FnOnce(&S) + Send>;

/// "Deliver on owner thread" primitive.
///
/// Implementations must run updates on the thread that owns `S`, one at a
/// time, in the order `update_ui` was called.
pub trait UiThread<S>: Send + Sync {
    fn update_ui(&self, update: UiUpdate<S>);
}

/// Owner side of a headless UI queue.
///
/// Not `Send`: it stays on the thread that owns the display and runs queued
/// updates when [`pump`](Self::pump) or [`run_until`](Self::run_until) is
/// called.
///
/// # Example
/// ```ignore
/// let (mut queue, handle) = UiQueue::new();
/// let display = TextDisplay::new();
/// runner.start(&display, Arc::new(handle))?;
/// queue.run_until(&display, |d| d.start_enabled());
/// ```
pub struct UiQueue<S> {
    rx: mpsc::UnboundedReceiver<UiUpdate<S>>,
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Cloneable producer side of a [`UiQueue`]
pub struct UiQueueHandle<S> {
    tx: mpsc::UnboundedSender<UiUpdate<S>>,
}

// Manual Clone implementation to avoid requiring S: Clone
impl<S> Clone for UiQueueHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> UiThread<S> for UiQueueHandle<S> {
    fn update_ui(&self, update: UiUpdate<S>) {
        if self.tx.send(update).is_err() {
            tracing::warn!("Failed to send UI update - display owner has gone away");
        }
    }
}

impl<S> UiQueue<S> {
    pub fn new() -> (UiQueue<S>, UiQueueHandle<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            UiQueue {
                rx,
                _not_send: std::marker::PhantomData,
            },
            UiQueueHandle { tx },
        )
    }

    /// Run every update queued so far without blocking.
    ///
    /// Returns the number of updates run.
    pub fn pump(&mut self, ui: &S) -> usize {
        let mut ran = 0;
        while let Ok(update) = self.rx.try_recv() {
            update(ui);
            ran += 1;
        }
        ran
    }

    /// Block, running updates as they arrive, until `done(ui)` holds.
    ///
    /// Returns `false` if every producer went away first. Must not be called
    /// from inside an async runtime.
    pub fn run_until<F>(&mut self, ui: &S, done: F) -> bool
    where
        F: Fn(&S) -> bool,
    {
        loop {
            if done(ui) {
                return true;
            }
            match self.rx.blocking_recv() {
                Some(update) => update(ui),
                None => return done(ui),
            }
        }
    }

    /// Like [`run_until`](Self::run_until), giving up after `timeout`.
    pub fn run_until_timeout<F>(&mut self, ui: &S, done: F, timeout: Duration) -> bool
    where
        F: Fn(&S) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump(ui);
            if done(ui) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

#[cfg(feature = "gui")]
pub use slint_bridge::{EventLoopBridge, EventLoopBridgeHandle};

#[cfg(feature = "gui")]
mod slint_bridge {
    use super::{UiThread, UiUpdate};
    use slint::ComponentHandle;
    use tokio::sync::mpsc;

    /// Coordinates between worker threads and the Slint event loop
    ///
    /// A background handler thread takes queued updates in order and hands
    /// each one to Slint with `upgrade_in_event_loop`, which runs it on the
    /// event loop thread.
    pub struct EventLoopBridge<T: ComponentHandle> {
        ui_update_tx: mpsc::UnboundedSender<UiUpdate<T>>,
    }

    impl<T: ComponentHandle + 'static> EventLoopBridge<T> {
        /// Create a new EventLoopBridge
        ///
        /// This sets up a background handler thread that processes UI update requests
        /// and marshals them to the Slint event loop.
        pub fn new(ui: &T) -> Self {
            // Weak reference to the UI component to prevent circular references
            let ui_weak = ui.as_weak();
            let (ui_update_tx, mut ui_update_rx) = mpsc::unbounded_channel::<UiUpdate<T>>();

            std::thread::spawn(move || {
                tracing::debug!("EventLoopBridge handler thread started");

                while let Some(update_fn) = ui_update_rx.blocking_recv() {
                    // Queued on Slint's event loop thread; FIFO with earlier updates
                    let result = ui_weak.upgrade_in_event_loop(move |ui| {
                        update_fn(&ui);
                    });

                    if let Err(e) = result {
                        tracing::warn!("Failed to queue UI update to event loop: {:?}", e);
                        // The event loop has stopped; nothing more can be delivered
                        break;
                    }
                }

                tracing::debug!("EventLoopBridge handler thread terminated");
            });

            Self { ui_update_tx }
        }

        /// Cloneable handle for callbacks and worker threads
        pub fn clone_handle(&self) -> EventLoopBridgeHandle<T> {
            EventLoopBridgeHandle {
                ui_update_tx: self.ui_update_tx.clone(),
            }
        }
    }

    /// Lightweight handle that can be cloned and passed to callbacks
    pub struct EventLoopBridgeHandle<T: ComponentHandle> {
        ui_update_tx: mpsc::UnboundedSender<UiUpdate<T>>,
    }

    // Manual Clone implementation to avoid requiring T: Clone
    impl<T: ComponentHandle> Clone for EventLoopBridgeHandle<T> {
        fn clone(&self) -> Self {
            Self {
                ui_update_tx: self.ui_update_tx.clone(),
            }
        }
    }

    impl<T: ComponentHandle + 'static> UiThread<T> for EventLoopBridgeHandle<T> {
        fn update_ui(&self, update: UiUpdate<T>) {
            if self.ui_update_tx.send(update).is_err() {
                tracing::warn!("Failed to send UI update - handler thread has stopped");
            }
        }
    }
}

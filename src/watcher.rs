//! Detects when the checkout popup has really been closed.
//!
//! The embedding SDK reports "closed" both when the shopper closes the
//! popup and when the popup navigates to a cross-origin payment provider.
//! `Window.closed` stays readable across origins, so polling it tells the
//! two apart without any message passing.

use std::rc::Rc;
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};

/// Polling interval used by [`WindowCloseWatcher::new`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A window handle whose closed state can be read from any origin.
pub trait PopupWindow {
    fn is_closed(&self) -> bool;
}

impl PopupWindow for web_sys::Window {
    fn is_closed(&self) -> bool {
        // A handle we can no longer read is as good as gone.
        self.closed().unwrap_or(true)
    }
}

/// Source of delays for polling loops.
pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// `setTimeout`-backed timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlooTimer;

impl Timer for GlooTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        gloo_timers::future::sleep(duration).boxed_local()
    }
}

/// Waits for a popup window to report `closed`.
#[derive(Clone)]
pub struct WindowCloseWatcher {
    timer: Rc<dyn Timer>,
    interval: Duration,
}

impl WindowCloseWatcher {
    pub fn new(timer: Rc<dyn Timer>) -> Self {
        Self::with_interval(timer, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(timer: Rc<dyn Timer>, interval: Duration) -> Self {
        Self { timer, interval }
    }

    /// Resolves once `window` is closed; immediately if it is missing or
    /// already closed. There is no timeout.
    pub async fn wait_for_close(&self, window: Option<Rc<dyn PopupWindow>>) {
        let Some(window) = window else {
            return;
        };
        while !window.is_closed() {
            self.timer.sleep(self.interval).await;
        }
        log::debug!("popup window reported closed");
    }
}

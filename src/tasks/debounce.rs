//! Debounce Timer
//!
//! Per-instance timer that runs a callback after a quiet period. Each
//! `schedule` call aborts the pending timer and starts a new one, so a burst
//! of calls results in a single run.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the timer task handle for one cache instance.
#[derive(Debug, Default)]
pub struct Debouncer {
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the timer so `task` runs after `delay` without further calls.
    ///
    /// Returns `false` when no tokio runtime is available, in which case
    /// nothing was scheduled and the caller must run the work itself.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                debug!("No runtime available, debounce bypassed");
                self.cancel();
                return false;
            }
        };

        let mut timer = self.timer.lock();
        if let Some(pending) = timer.take() {
            pending.abort();
        }
        *timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        }));
        true
    }

    /// Aborts the pending timer, if any.
    pub fn cancel(&self) {
        if let Some(pending) = self.timer.lock().take() {
            pending.abort();
        }
    }

    /// Whether a timer has been scheduled and has not yet run.
    pub fn is_pending(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

//! Cooperative cancellation and injectable sleeping for the worker pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct StopInner {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Shared stop flag that also wakes anyone waiting on it.
///
/// Cloning yields a handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    /// Create a signal in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake all waiters.
    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.cond.notify_all();
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Wait up to `timeout` for a stop. Returns true if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self.inner.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Source of backoff delays.
///
/// The pool never calls `thread::sleep` directly so tests can substitute a
/// clock that only records time.
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`, returning early if `stop` fires.
    fn sleep(&self, duration: Duration, stop: &StopSignal);
}

/// Real sleeper backed by the stop signal's condition variable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, stop: &StopSignal) {
        stop.wait_timeout(duration);
    }
}

/// Fake clock that records requested sleeps and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }

    /// Total virtual time elapsed.
    pub fn elapsed(&self) -> Duration {
        self.slept.lock().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, _stop: &StopSignal) {
        self.slept.lock().push(duration);
    }
}

//! Progress tracking for a download session.
//!
//! Every worker reports into one [`ProgressTracker`]. All counters live
//! behind a single lock so a snapshot is always internally consistent
//! (`completed + failed` never exceeds `total`, and the failure list always
//! has `failed` entries). A [`ProgressReporter`] thread polls the tracker
//! and hands snapshots to a callback.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::stop::StopSignal;

/// One entry that ended the session without being downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    /// Manifest path.
    pub entry: String,
    /// Last error seen for it.
    pub error: String,
    /// Whether the origin reported it as 404.
    #[serde(default)]
    pub not_found: bool,
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Tasks scheduled for this session.
    pub total: usize,
    /// Tasks downloaded successfully.
    pub completed: usize,
    /// Tasks that failed, 404s included.
    pub failed: usize,
    /// Subset of `failed` the origin reported as 404.
    #[serde(default)]
    pub not_found: usize,
    /// Bytes written to the mirror.
    pub bytes_downloaded: u64,
    /// Every failed entry with its final error.
    pub failed_entries: Vec<FailedEntry>,
    /// Why the pool stopped early, if it did.
    pub halted: Option<String>,
}

impl ProgressState {
    /// Tasks neither completed nor failed.
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.completed + self.failed)
    }

    /// Whether every scheduled task has finished one way or another.
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Failures other than 404.
    pub fn other_failures(&self) -> usize {
        self.failed.saturating_sub(self.not_found)
    }

    /// Fraction of tasks finished, 0.0 to 1.0.
    pub fn fraction_done(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.completed + self.failed) as f64 / self.total as f64
        }
    }
}

#[derive(Debug)]
struct TrackerInner {
    state: ProgressState,
    started: Instant,
}

/// Thread-safe progress accumulator shared by the worker pool.
#[derive(Debug)]
pub struct ProgressTracker {
    inner: Mutex<TrackerInner>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ProgressTracker {
    /// Start tracking a session of `total` tasks.
    pub fn new(total: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                state: ProgressState {
                    total,
                    ..ProgressState::default()
                },
                started: Instant::now(),
            }),
        }
    }

    /// Schedule more tasks.
    pub fn add_total(&self, count: usize) {
        self.inner.lock().state.total += count;
    }

    /// Record a downloaded file of `bytes` bytes.
    pub fn record_success(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.state.completed += 1;
        inner.state.bytes_downloaded += bytes;
    }

    /// Record a task that will not be retried again.
    pub fn record_failure(&self, entry: &str, error: &str, not_found: bool) {
        let mut inner = self.inner.lock();
        inner.state.failed += 1;
        if not_found {
            inner.state.not_found += 1;
        }
        inner.state.failed_entries.push(FailedEntry {
            entry: entry.to_string(),
            error: error.to_string(),
            not_found,
        });
    }

    /// Record that the pool stopped before draining its queue.
    ///
    /// The first reason wins.
    pub fn set_halted(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.state.halted.is_none() {
            inner.state.halted = Some(reason.into());
        }
    }

    /// Consistent copy of the current counters.
    pub fn snapshot(&self) -> ProgressState {
        self.inner.lock().state.clone()
    }

    /// Time since the tracker was created.
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().started.elapsed()
    }

    /// Average download rate in bytes per second.
    pub fn throughput(&self) -> f64 {
        let inner = self.inner.lock();
        let secs = inner.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            inner.state.bytes_downloaded as f64 / secs
        } else {
            0.0
        }
    }
}

/// Callback receiving periodic snapshots and the elapsed session time.
pub type ProgressCallback = Box<dyn Fn(&ProgressState, Duration) + Send + Sync>;

/// Background thread that reports progress at a fixed interval.
///
/// The callback fires immediately, then every `interval`, and once more
/// when the reporter is stopped or dropped.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    done: StopSignal,
}

impl ProgressReporter {
    /// Start reporting on `tracker`.
    pub fn start(
        tracker: Arc<ProgressTracker>,
        callback: ProgressCallback,
        interval: Duration,
    ) -> Self {
        let done = StopSignal::new();
        let done_clone = done.clone();

        let handle = thread::spawn(move || {
            loop {
                callback(&tracker.snapshot(), tracker.elapsed());
                if done_clone.wait_timeout(interval) {
                    break;
                }
            }

            // Final report
            callback(&tracker.snapshot(), tracker.elapsed());
        });

        Self {
            handle: Some(handle),
            done,
        }
    }

    /// Stop the reporter and wait for its final report.
    pub fn stop(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.done.stop();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tracker_counts() {
        let tracker = ProgressTracker::new(3);
        tracker.record_success(100);
        tracker.record_failure("a.txt", "HTTP 404", true);

        let state = tracker.snapshot();
        assert_eq!(state.total, 3);
        assert_eq!(state.completed, 1);
        assert_eq!(state.failed, 1);
        assert_eq!(state.not_found, 1);
        assert_eq!(state.other_failures(), 0);
        assert_eq!(state.bytes_downloaded, 100);
        assert_eq!(state.pending(), 1);
        assert!(!state.is_complete());
        assert_eq!(state.failed_entries[0].entry, "a.txt");
    }

    #[test]
    fn test_add_total() {
        let tracker = ProgressTracker::default();
        tracker.add_total(5);
        tracker.add_total(2);
        assert_eq!(tracker.snapshot().total, 7);
    }

    #[test]
    fn test_first_halt_reason_wins() {
        let tracker = ProgressTracker::new(1);
        tracker.set_halted("disk full");
        tracker.set_halted("cancelled");
        assert_eq!(tracker.snapshot().halted.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_empty_session_is_complete() {
        let state = ProgressState::default();
        assert!(state.is_complete());
        assert_eq!(state.fraction_done(), 1.0);
    }

    #[test]
    fn test_concurrent_updates_are_exact() {
        let tracker = Arc::new(ProgressTracker::new(8 * 500));

        thread::scope(|scope| {
            for worker in 0..8 {
                let tracker = &tracker;
                scope.spawn(move || {
                    for i in 0..500 {
                        if i % 5 == 0 {
                            tracker.record_failure(&format!("w{}/{}", worker, i), "HTTP 500", false);
                        } else {
                            tracker.record_success(10);
                        }
                    }
                });
            }
        });

        let state = tracker.snapshot();
        assert_eq!(state.completed, 8 * 400);
        assert_eq!(state.failed, 8 * 100);
        assert_eq!(state.failed_entries.len(), state.failed);
        assert_eq!(state.bytes_downloaded, 8 * 400 * 10);
        assert!(state.is_complete());
    }

    #[test]
    fn test_snapshots_stay_consistent_during_updates() {
        let tracker = Arc::new(ProgressTracker::new(2000));

        thread::scope(|scope| {
            let writer = Arc::clone(&tracker);
            scope.spawn(move || {
                for i in 0..2000 {
                    if i % 2 == 0 {
                        writer.record_success(1);
                    } else {
                        writer.record_failure("x", "err", false);
                    }
                }
            });

            for _ in 0..200 {
                let state = tracker.snapshot();
                assert!(state.completed + state.failed <= state.total);
                assert_eq!(state.failed_entries.len(), state.failed);
            }
        });
    }

    #[test]
    fn test_progress_state_serde() {
        let tracker = ProgressTracker::new(2);
        tracker.record_success(42);
        tracker.record_failure("b.json", "HTTP 404", true);

        let state = tracker.snapshot();
        let json = serde_json::to_string(&state).unwrap();
        let back: ProgressState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_reporter_lifecycle() {
        let tracker = Arc::new(ProgressTracker::new(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let last_completed = Arc::new(AtomicUsize::new(0));
        let last_clone = Arc::clone(&last_completed);

        let reporter = ProgressReporter::start(
            Arc::clone(&tracker),
            Box::new(move |state, _elapsed| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                last_clone.store(state.completed, Ordering::SeqCst);
            }),
            Duration::from_secs(60),
        );

        tracker.record_success(1);
        reporter.stop();

        // Initial report plus the final one
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(last_completed.load(Ordering::SeqCst), 1);
    }
}

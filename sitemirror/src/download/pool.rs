//! Bounded worker pool that drains a queue of fetch tasks.
//!
//! Workers share one `VecDeque` behind a mutex; popping from it is the only
//! way to claim a task, so each task is held by exactly one worker. Each task
//! runs an explicit bounded retry loop whose sleeps go through an injected
//! [`Sleeper`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::atomic::AtomicWrite;
use super::error::{FetchError, FetchErrorKind};
use super::fetcher::Fetcher;
use super::policy::RetryPolicy;
use super::progress::{ProgressState, ProgressTracker};
use super::stop::{Sleeper, StopSignal, ThreadSleeper};
use crate::manifest::FetchTask;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default number of retries for local write failures.
pub const DEFAULT_LOCAL_IO_RETRIES: u32 = 2;

/// Delay before retrying a failed local write.
const LOCAL_IO_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Buffer size for streaming bodies to disk.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Reason recorded when the pool is cancelled externally.
const CANCELLED: &str = "cancelled";

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Retry policy for transient origin failures.
    pub retry: RetryPolicy,
    /// Retries allowed for local I/O failures.
    pub local_io_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            local_io_retries: DEFAULT_LOCAL_IO_RETRIES,
        }
    }
}

impl PoolConfig {
    /// Set the number of workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the local I/O retry budget.
    pub fn with_local_io_retries(mut self, retries: u32) -> Self {
        self.local_io_retries = retries;
        self
    }
}

/// Outcome of one task, from the worker's point of view.
enum TaskOutcome {
    Done,
    /// Stop was requested before the task finished; it stays pending.
    Abandoned,
}

/// Downloads fetch tasks with bounded parallelism and retry.
pub struct DownloadWorkerPool {
    config: PoolConfig,
    fetcher: Arc<dyn Fetcher>,
    sleeper: Arc<dyn Sleeper>,
    tracker: Arc<ProgressTracker>,
    stop: StopSignal,
}

impl DownloadWorkerPool {
    /// Create a pool using real sleeps.
    pub fn new(config: PoolConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            fetcher,
            sleeper: Arc::new(ThreadSleeper),
            tracker: Arc::new(ProgressTracker::new(0)),
            stop: StopSignal::new(),
        }
    }

    /// Replace the sleeper used for backoff delays.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Use an externally owned stop signal (for Ctrl+C handling).
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Progress tracker fed by this pool.
    pub fn tracker(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.tracker)
    }

    /// The pool's stop signal.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Pool settings.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Download every task, blocking until the queue is drained or the pool
    /// is stopped. Returns the final progress snapshot.
    pub fn run(&self, tasks: Vec<FetchTask>) -> ProgressState {
        self.tracker.add_total(tasks.len());
        if tasks.is_empty() {
            return self.tracker.snapshot();
        }

        let workers = self.config.workers.max(1).min(tasks.len());
        info!(tasks = tasks.len(), workers, "Starting download pool");

        let queue = Mutex::new(VecDeque::from(tasks));
        thread::scope(|scope| {
            for worker in 0..workers {
                let queue = &queue;
                scope.spawn(move || self.worker_loop(worker, queue));
            }
        });

        let unclaimed = queue.lock().len();
        if self.stop.is_stopped() {
            self.tracker.set_halted(CANCELLED);
        }

        let state = self.tracker.snapshot();
        info!(
            completed = state.completed,
            failed = state.failed,
            not_found = state.not_found,
            pending = state.pending(),
            unclaimed,
            bytes = state.bytes_downloaded,
            "Download pool finished"
        );
        state
    }

    fn worker_loop(&self, worker: usize, queue: &Mutex<VecDeque<FetchTask>>) {
        loop {
            if self.stop.is_stopped() {
                debug!(worker, "Worker stopping");
                return;
            }
            // The lock is released before the task runs
            let Some(task) = queue.lock().pop_front() else {
                return;
            };
            if let TaskOutcome::Abandoned = self.process(task) {
                return;
            }
        }
    }

    fn process(&self, mut task: FetchTask) -> TaskOutcome {
        let mut retries = 0u32;
        let mut local_failures = 0u32;

        loop {
            task.attempts += 1;
            let error = match self.attempt(&task) {
                Ok(bytes) => {
                    debug!(entry = %task.entry, bytes, attempts = task.attempts, "Downloaded");
                    self.tracker.record_success(bytes);
                    return TaskOutcome::Done;
                }
                Err(error) => error,
            };

            let delay = match error.kind() {
                FetchErrorKind::Permanent => None,
                FetchErrorKind::Transient => {
                    retries += 1;
                    self.config.retry.backoff(retries, error.retry_after())
                }
                FetchErrorKind::LocalIo if error.is_systemic() => {
                    warn!(entry = %task.entry, error = %error, "Halting download pool");
                    self.tracker.set_halted(error.to_string());
                    self.stop.stop();
                    None
                }
                FetchErrorKind::LocalIo => {
                    local_failures += 1;
                    (local_failures <= self.config.local_io_retries).then_some(LOCAL_IO_RETRY_DELAY)
                }
            };

            let Some(delay) = delay else {
                warn!(entry = %task.entry, attempts = task.attempts, error = %error, "Download failed");
                self.tracker
                    .record_failure(task.entry.path(), &error.to_string(), error.is_not_found());
                return TaskOutcome::Done;
            };

            warn!(
                entry = %task.entry,
                attempt = task.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying download"
            );
            self.sleeper.sleep(delay, &self.stop);
            if self.stop.is_stopped() {
                debug!(entry = %task.entry, "Abandoning task after stop");
                return TaskOutcome::Abandoned;
            }
        }
    }

    /// One GET streamed into a temporary file and renamed into place.
    fn attempt(&self, task: &FetchTask) -> Result<u64, FetchError> {
        let response = self.fetcher.get(&task.remote_url)?;

        let mut file = AtomicWrite::create(&task.destination)
            .map_err(|e| FetchError::local("create", &task.destination, e))?;
        let written = copy_body(response.body, &mut file, &task.destination)?;

        if let Some(announced) = response.content_length {
            if written != announced {
                return Err(FetchError::SizeMismatch {
                    expected: announced,
                    actual: written,
                });
            }
        }
        if written == 0 {
            return Err(FetchError::EmptyBody);
        }
        if let Some(expected) = task.entry.expected_size() {
            if written != expected {
                return Err(FetchError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        file.commit()
            .map_err(|e| FetchError::local("rename", &task.destination, e))?;
        Ok(written)
    }
}

/// Stream `body` into `file`, returning the number of bytes written.
///
/// Read errors are network failures; write errors are local.
fn copy_body(
    mut body: Box<dyn Read + Send>,
    file: &mut AtomicWrite,
    destination: &Path,
) -> Result<u64, FetchError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let read = match body.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FetchError::Network(e.to_string())),
        };
        file.write_all(&buffer[..read])
            .map_err(|e| FetchError::local("write", destination, e))?;
        written += read as u64;
    }
    Ok(written)
}

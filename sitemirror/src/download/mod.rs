//! Resumable bulk downloader.
//!
//! This module fetches the manifest entries missing from the mirror:
//! - Retry policy with capped exponential backoff (`policy`)
//! - The fetcher seam and its reqwest implementation (`fetcher`, `http`)
//! - Write-then-rename file output (`atomic`)
//! - The bounded worker pool (`pool`)
//! - Progress aggregation and periodic reporting (`progress`)
//! - The on-disk session journal (`journal`)
//! - End-to-end session orchestration (`session`)
//!
//! # Architecture
//!
//! ```text
//! DownloadSession
//!         │
//!         ├── Manifest + compute_missing ──► Vec<FetchTask>
//!         │
//!         ├── DownloadWorkerPool
//!         │       ├── Fetcher (trait)
//!         │       │       └── HttpFetcher
//!         │       ├── RetryPolicy + Sleeper
//!         │       └── AtomicWrite
//!         │
//!         ├── ProgressTracker ──► ProgressReporter
//!         │
//!         └── Journal (download_journal.json, download_failures.txt)
//! ```

mod atomic;
mod error;
mod fetcher;
mod http;
mod journal;
mod policy;
mod pool;
mod progress;
mod session;
mod stop;

pub use atomic::{sweep_stale_parts, write_atomic, AtomicWrite, PART_SUFFIX};
pub use error::{DownloadError, DownloadResult, FetchError, FetchErrorKind};
pub use fetcher::{FetchResponse, Fetcher};
pub use http::{
    FetcherConfig, HttpFetcher, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS,
    DEFAULT_USER_AGENT,
};
pub use journal::{Journal, JournalError, JournalResult, SessionJournal, FAILURES_FILE, JOURNAL_FILE};
pub use policy::{RetryPolicy, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS};
pub use pool::{DownloadWorkerPool, PoolConfig, DEFAULT_LOCAL_IO_RETRIES, DEFAULT_WORKERS};
pub use progress::{FailedEntry, ProgressCallback, ProgressReporter, ProgressState, ProgressTracker};
pub use session::{DownloadSession, SessionConfig, SessionSummary, DEFAULT_PROGRESS_INTERVAL_SECS};
pub use stop::{RecordingSleeper, Sleeper, StopSignal, ThreadSleeper};

//! One complete download run: plan, fetch, journal.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::atomic::sweep_stale_parts;
use super::error::{DownloadError, DownloadResult};
use super::fetcher::Fetcher;
use super::http::{FetcherConfig, HttpFetcher};
use super::journal::{Journal, JournalError, SessionJournal};
use super::pool::{DownloadWorkerPool, PoolConfig};
use super::progress::{ProgressCallback, ProgressReporter, ProgressState};
use super::stop::{Sleeper, StopSignal};
use crate::manifest::{compute_missing, DiffReport, Manifest};
use crate::path_policy::PathPolicy;

/// Default interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 5;

/// Everything a download session needs to know.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Mirror root directory.
    pub root: PathBuf,
    /// Manifest file.
    pub manifest: PathBuf,
    /// Origin base URL, without trailing slash.
    pub base_url: String,
    /// Directory holding the journal files.
    pub journal_dir: PathBuf,
    /// HTTP client settings.
    pub fetcher: FetcherConfig,
    /// Worker pool settings.
    pub pool: PoolConfig,
    /// Interval between progress callbacks.
    pub progress_interval: Duration,
}

impl SessionConfig {
    pub fn new(
        root: impl Into<PathBuf>,
        manifest: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            manifest: manifest.into(),
            base_url: base_url.into(),
            journal_dir: PathBuf::from("."),
            fetcher: FetcherConfig::default(),
            pool: PoolConfig::default(),
            progress_interval: Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS),
        }
    }

    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = dir.into();
        self
    }

    pub fn with_fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Result of a finished session.
#[derive(Debug)]
pub struct SessionSummary {
    /// Final progress counters.
    pub progress: ProgressState,
    /// Entries already present before the session.
    pub present: usize,
    /// Entries skipped for unsafe paths.
    pub rejected: usize,
    /// Wall-clock duration of the fetch phase.
    pub elapsed: Duration,
    /// Failure list, if any entries failed for reasons other than 404.
    pub failures_path: Option<PathBuf>,
    /// Set when the journal could not be written. The counters above are
    /// still accurate for the files on disk.
    pub journal_error: Option<JournalError>,
}

/// Drives a download session end to end.
pub struct DownloadSession {
    config: SessionConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    stop: StopSignal,
}

impl DownloadSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            fetcher: None,
            sleeper: None,
            stop: StopSignal::new(),
        }
    }

    /// Use a custom fetcher instead of the HTTP client.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use a custom sleeper for backoff delays.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Use an externally owned stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Path policy for this mirror.
    pub fn policy(&self) -> PathPolicy {
        PathPolicy::new(&self.config.root, self.config.base_url.clone())
    }

    /// Load the manifest and work out what is missing.
    pub fn plan(&self) -> DownloadResult<(Manifest, DiffReport)> {
        fs::create_dir_all(&self.config.root).map_err(|source| DownloadError::CreateRoot {
            path: self.config.root.clone(),
            source,
        })?;

        let manifest = Manifest::load(&self.config.manifest)?;
        let report = compute_missing(&manifest, &self.policy());

        // Leftovers from a killed process; unclaimed destinations only
        let swept = sweep_stale_parts(report.tasks.iter().map(|t| t.destination.as_path()));
        if swept > 0 {
            info!(swept, "Removed leftover partial files");
        }
        info!(
            manifest = manifest.len(),
            present = report.present,
            missing = report.tasks.len(),
            rejected = report.rejected.len(),
            "Planned download session"
        );
        Ok((manifest, report))
    }

    /// Fetch everything in `report`, then write the journal.
    pub fn run(
        &self,
        report: DiffReport,
        on_progress: Option<ProgressCallback>,
    ) -> DownloadResult<SessionSummary> {
        let fetcher: Arc<dyn Fetcher> = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(HttpFetcher::new(&self.config.fetcher)?),
        };

        let mut pool = DownloadWorkerPool::new(self.config.pool.clone(), fetcher)
            .with_stop_signal(self.stop.clone());
        if let Some(sleeper) = &self.sleeper {
            pool = pool.with_sleeper(Arc::clone(sleeper));
        }

        let started = Instant::now();
        let reporter = on_progress.map(|callback| {
            ProgressReporter::start(pool.tracker(), callback, self.config.progress_interval)
        });

        let progress = pool.run(report.tasks);
        if let Some(reporter) = reporter {
            reporter.stop();
        }
        let elapsed = started.elapsed();

        let journal = Journal::new(&self.config.journal_dir);
        let (failures_path, journal_error) = match journal.save(&SessionJournal::finished_now(
            progress.clone(),
            elapsed.as_secs_f64(),
        )) {
            Ok(path) => (path, None),
            Err(e) => {
                warn!(error = %e, "Failed to write session journal");
                (None, Some(e))
            }
        };

        Ok(SessionSummary {
            progress,
            present: report.present,
            rejected: report.rejected.len(),
            elapsed,
            failures_path,
            journal_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::error::FetchError;
    use crate::download::fetcher::FetchResponse;
    use crate::download::stop::RecordingSleeper;
    use tempfile::TempDir;

    struct EchoFetcher;

    impl Fetcher for EchoFetcher {
        fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
            if url.ends_with("missing.txt") {
                return Err(FetchError::Status {
                    status: 404,
                    retry_after: None,
                });
            }
            Ok(FetchResponse::from_bytes(url.as_bytes().to_vec()))
        }
    }

    fn session(dir: &TempDir, manifest: &str) -> DownloadSession {
        let manifest_path = dir.path().join("filelist.txt");
        fs::write(&manifest_path, manifest).unwrap();
        DownloadSession::new(
            SessionConfig::new(dir.path().join("site"), manifest_path, "https://origin.test")
                .with_journal_dir(dir.path()),
        )
        .with_fetcher(Arc::new(EchoFetcher))
        .with_sleeper(Arc::new(RecordingSleeper::new()))
    }

    #[test]
    fn test_plan_creates_root_and_diffs() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir, "a.txt\n../evil\nb/c.txt\n");

        let (manifest, report) = session.plan().unwrap();

        assert!(dir.path().join("site").is_dir());
        assert_eq!(manifest.len(), 3);
        assert_eq!(report.tasks.len(), 2);
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn test_run_writes_files_and_journal() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir, "a.txt\nmissing.txt\n");

        let (_, report) = session.plan().unwrap();
        let summary = session.run(report, None).unwrap();

        assert_eq!(summary.progress.completed, 1);
        assert_eq!(summary.progress.not_found, 1);
        assert!(summary.failures_path.is_none());
        assert_eq!(
            fs::read_to_string(dir.path().join("site/a.txt")).unwrap(),
            "https://origin.test/a.txt"
        );

        let journal = Journal::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(journal.progress, summary.progress);
    }

    #[test]
    fn test_missing_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let session = DownloadSession::new(SessionConfig::new(
            dir.path().join("site"),
            dir.path().join("nope.txt"),
            "https://origin.test",
        ));

        assert!(matches!(session.plan(), Err(DownloadError::Manifest(_))));
    }

    #[test]
    fn test_plan_sweeps_leftover_partial_files() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir, "x.txt\n");
        let site = dir.path().join("site");
        fs::create_dir_all(&site).unwrap();
        let orphan = site.join(".x.txt.Ab12Cd.part");
        fs::write(&orphan, b"half a file").unwrap();

        let (_, report) = session.plan().unwrap();
        assert!(!orphan.exists());
        let summary = session.run(report, None).unwrap();

        assert_eq!(summary.progress.completed, 1);
        let names: Vec<String> = fs::read_dir(&site)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.txt".to_string()]);
    }

    #[test]
    fn test_unwritable_journal_still_returns_summary() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("filelist.txt");
        fs::write(&manifest_path, "a.txt\n").unwrap();
        // A regular file where the journal directory should be
        let blocker = dir.path().join("journal");
        fs::write(&blocker, b"not a directory").unwrap();
        let session = DownloadSession::new(
            SessionConfig::new(dir.path().join("site"), manifest_path, "https://origin.test")
                .with_journal_dir(&blocker),
        )
        .with_fetcher(Arc::new(EchoFetcher));

        let (_, report) = session.plan().unwrap();
        let summary = session.run(report, None).unwrap();

        assert_eq!(summary.progress.completed, 1);
        assert!(dir.path().join("site/a.txt").is_file());
        assert!(matches!(summary.journal_error, Some(JournalError::Io { .. })));
        assert!(summary.failures_path.is_none());
    }
}

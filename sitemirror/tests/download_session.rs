//! End-to-end download sessions against a mock origin.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sitemirror::download::{
    DownloadSession, FetchError, FetchResponse, Fetcher, Journal, PoolConfig, RecordingSleeper,
    RetryPolicy, SessionConfig, StopSignal, FAILURES_FILE,
};
use sitemirror::manifest::Manifest;
use sitemirror::path_policy::PathPolicy;
use sitemirror::status::MirrorStatus;
use tempfile::TempDir;

fn write_manifest(dir: &TempDir, text: &str) -> std::path::PathBuf {
    let path = dir.path().join("filelist.txt");
    fs::write(&path, text).unwrap();
    path
}

fn config(dir: &TempDir, manifest: &Path, base_url: &str, pool: PoolConfig) -> SessionConfig {
    SessionConfig::new(dir.path().join("site"), manifest, base_url)
        .with_journal_dir(dir.path())
        .with_pool(pool)
}

fn part_files(root: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.to_string_lossy().ends_with(".part") {
                found.push(path.display().to_string());
            }
        }
    }
    found
}

#[test]
fn test_fresh_mirror_downloads_everything() {
    let mut origin = mockito::Server::new();
    let a = origin.mock("GET", "/a.txt").with_body("alpha").create();
    let c = origin.mock("GET", "/b/c.txt").with_body("charlie!").create();

    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, "a.txt\nb/c.txt\n");
    let pool = PoolConfig::default().with_workers(1).with_retry(RetryPolicy::None);
    let session = DownloadSession::new(config(&dir, &manifest, &origin.url(), pool));

    let (_, report) = session.plan().unwrap();
    assert_eq!(report.tasks.len(), 2);
    let summary = session.run(report, None).unwrap();

    a.assert();
    c.assert();
    assert_eq!(summary.progress.completed, 2);
    assert_eq!(summary.progress.failed, 0);
    assert_eq!(summary.progress.bytes_downloaded, 13);
    assert_eq!(fs::read(dir.path().join("site/a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(dir.path().join("site/b/c.txt")).unwrap(), b"charlie!");

    // A second run finds nothing to do
    let (_, again) = session.plan().unwrap();
    assert!(again.tasks.is_empty());
    assert_eq!(again.present, 2);
}

#[test]
fn test_directory_entries_fetch_directory_urls() {
    let mut origin = mockito::Server::new();
    let page = origin
        .mock("GET", "/sr/char/1001/")
        .with_body("<html>1001</html>")
        .create();

    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, "sr/char/1001/index.html\n");
    let session = DownloadSession::new(config(&dir, &manifest, &origin.url(), PoolConfig::default()));

    let (_, report) = session.plan().unwrap();
    session.run(report, None).unwrap();

    page.assert();
    assert_eq!(
        fs::read_to_string(dir.path().join("site/sr/char/1001/index.html")).unwrap(),
        "<html>1001</html>"
    );
}

/// Fails the first `failures` requests with 500, then serves the URL.
struct FlakyOrigin {
    failures: usize,
    calls: AtomicUsize,
}

impl Fetcher for FlakyOrigin {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(FetchError::Status {
                status: 500,
                retry_after: None,
            });
        }
        Ok(FetchResponse::from_bytes(url.as_bytes().to_vec()))
    }
}

#[test]
fn test_transient_errors_recover_within_budget() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, "x.txt\n");
    let origin = Arc::new(FlakyOrigin {
        failures: 3,
        calls: AtomicUsize::new(0),
    });
    let sleeper = Arc::new(RecordingSleeper::new());
    let pool = PoolConfig::default().with_retry(RetryPolicy::exponential(3));
    let session = DownloadSession::new(config(&dir, &manifest, "https://origin.test", pool))
        .with_fetcher(origin.clone())
        .with_sleeper(sleeper.clone());

    let (_, report) = session.plan().unwrap();
    let summary = session.run(report, None).unwrap();

    assert_eq!(summary.progress.completed, 1);
    assert_eq!(summary.progress.failed, 0);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 4);
    assert_eq!(sleeper.delays().len(), 3);
    assert!(dir.path().join("site/x.txt").is_file());
}

#[test]
fn test_not_found_is_recorded_and_absent() {
    let mut origin = mockito::Server::new();
    let missing = origin.mock("GET", "/x.txt").with_status(404).expect(1).create();

    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, "x.txt\n");
    let session = DownloadSession::new(config(&dir, &manifest, &origin.url(), PoolConfig::default()))
        .with_sleeper(Arc::new(RecordingSleeper::new()));

    let (_, report) = session.plan().unwrap();
    let summary = session.run(report, None).unwrap();

    missing.assert();
    assert_eq!(summary.progress.failed, 1);
    assert_eq!(summary.progress.not_found, 1);
    assert_eq!(summary.progress.failed_entries[0].entry, "x.txt");
    assert!(!dir.path().join("site/x.txt").exists());
    // 404s are not worth a manual retry list
    assert!(!dir.path().join(FAILURES_FILE).exists());

    let journal = Journal::new(dir.path()).load().unwrap().unwrap();
    assert_eq!(journal.progress.not_found, 1);
}

#[test]
fn test_server_errors_land_in_failure_list() {
    let mut origin = mockito::Server::new();
    origin.mock("GET", "/broken.txt").with_status(502).create();
    origin.mock("GET", "/ok.txt").with_body("fine").create();

    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(&dir, "broken.txt\nok.txt\n");
    let pool = PoolConfig::default().with_retry(RetryPolicy::exponential(1));
    let session = DownloadSession::new(config(&dir, &manifest, &origin.url(), pool))
        .with_sleeper(Arc::new(RecordingSleeper::new()));

    let (_, report) = session.plan().unwrap();
    let summary = session.run(report, None).unwrap();

    assert_eq!(summary.progress.completed, 1);
    assert_eq!(summary.progress.failed, 1);
    let failures = fs::read_to_string(summary.failures_path.unwrap()).unwrap();
    assert!(failures.starts_with("broken.txt\t"));
}

/// Serves URLs and raises the stop signal after `limit` successful fetches.
struct StoppingOrigin {
    stop: StopSignal,
    limit: usize,
    served: AtomicUsize,
}

impl Fetcher for StoppingOrigin {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        if self.served.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
            self.stop.stop();
        }
        Ok(FetchResponse::from_bytes(url.as_bytes().to_vec()))
    }
}

#[test]
fn test_interrupted_session_resumes_without_refetching() {
    let dir = TempDir::new().unwrap();
    let entries: Vec<String> = (0..20).map(|i| format!("files/{:02}.txt", i)).collect();
    let manifest = write_manifest(&dir, &entries.join("\n"));
    let pool = PoolConfig::default().with_workers(2);

    let stop = StopSignal::new();
    let first = Arc::new(StoppingOrigin {
        stop: stop.clone(),
        limit: 5,
        served: AtomicUsize::new(0),
    });
    let session = DownloadSession::new(config(&dir, &manifest, "https://origin.test", pool.clone()))
        .with_fetcher(first)
        .with_stop_signal(stop);
    let (_, report) = session.plan().unwrap();
    let interrupted = session.run(report, None).unwrap();

    assert!(interrupted.progress.halted.is_some());
    assert!(interrupted.progress.completed < 20);
    assert!(part_files(&dir.path().join("site")).is_empty());

    // What a killed process leaves behind: a temp file for an unfinished entry
    let unfinished = entries
        .iter()
        .find(|e| !dir.path().join("site").join(e).exists())
        .unwrap();
    let name = Path::new(unfinished).file_name().unwrap().to_string_lossy().into_owned();
    let orphan = dir.path().join("site/files").join(format!(".{}.k1ll3d.part", name));
    fs::write(&orphan, b"truncated").unwrap();

    // Everything already on disk is complete, so the rerun only fetches the rest
    let done_before = interrupted.progress.completed;
    let second = Arc::new(FlakyOrigin {
        failures: 0,
        calls: AtomicUsize::new(0),
    });
    let resumed = DownloadSession::new(config(&dir, &manifest, "https://origin.test", pool))
        .with_fetcher(second.clone());
    let (_, report) = resumed.plan().unwrap();
    assert_eq!(report.present, done_before);
    let summary = resumed.run(report, None).unwrap();

    assert_eq!(second.calls.load(Ordering::SeqCst), 20 - done_before);
    assert_eq!(summary.progress.completed + done_before, 20);
    assert!(part_files(&dir.path().join("site")).is_empty());

    let policy = PathPolicy::new(dir.path().join("site"), "https://origin.test");
    let manifest = Manifest::load(&manifest).unwrap();
    let status = MirrorStatus::compute(&manifest, &policy, &Journal::new(dir.path())).unwrap();
    assert_eq!(status.present, 20);
    assert_eq!(status.missing, 0);
    assert!(status.last_session.is_some());
}

//! On-disk record of the last download session.
//!
//! Two files live in the journal directory:
//!
//! - `download_journal.json`: the final [`ProgressState`] plus timing, read
//!   back by `status`.
//! - `download_failures.txt`: one `entry<TAB>error` line per failed entry
//!   other than 404s, for manual follow-up. Removed when a session ends with
//!   no such failures.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::atomic::write_atomic;
use super::progress::ProgressState;

/// File name of the JSON session journal.
pub const JOURNAL_FILE: &str = "download_journal.json";

/// File name of the failure list.
pub const FAILURES_FILE: &str = "download_failures.txt";

/// Errors reading or writing the journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("journal at {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Summary of one finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionJournal {
    /// RFC 3339 local timestamp of the end of the session.
    pub finished_at: String,
    /// Wall-clock duration of the session.
    pub elapsed_secs: f64,
    /// Final counters.
    pub progress: ProgressState,
}

impl SessionJournal {
    /// Stamp a finished session with the current time.
    pub fn finished_now(progress: ProgressState, elapsed_secs: f64) -> Self {
        let now: DateTime<Local> = Local::now();
        Self {
            finished_at: now.to_rfc3339(),
            elapsed_secs,
            progress,
        }
    }
}

/// Location of the journal files.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the JSON journal.
    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Path of the failure list.
    pub fn failures_path(&self) -> PathBuf {
        self.dir.join(FAILURES_FILE)
    }

    /// Persist a session. Returns the failure list path when one was written.
    pub fn save(&self, session: &SessionJournal) -> JournalResult<Option<PathBuf>> {
        let journal_path = self.journal_path();
        let json = serde_json::to_vec_pretty(session).map_err(|source| JournalError::Parse {
            path: journal_path.clone(),
            source,
        })?;
        write_atomic(&journal_path, &json).map_err(|source| io_error(&journal_path, source))?;
        debug!(path = %journal_path.display(), "Saved session journal");

        let failures_path = self.failures_path();
        let lines: String = session
            .progress
            .failed_entries
            .iter()
            .filter(|f| !f.not_found)
            .map(|f| format!("{}\t{}\n", f.entry, f.error))
            .collect();

        if lines.is_empty() {
            match fs::remove_file(&failures_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(io_error(&failures_path, source)),
            }
            return Ok(None);
        }

        write_atomic(&failures_path, lines.as_bytes())
            .map_err(|source| io_error(&failures_path, source))?;
        info!(path = %failures_path.display(), "Saved failure list");
        Ok(Some(failures_path))
    }

    /// Load the last session, or `None` if no session has been recorded.
    pub fn load(&self) -> JournalResult<Option<SessionJournal>> {
        let path = self.journal_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| JournalError::Parse { path, source })
    }
}

fn io_error(path: &Path, source: io::Error) -> JournalError {
    JournalError::Io {
        path: path.to_path_buf(),
        source,
    }
}

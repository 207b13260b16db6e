//! Error types for the downloader.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::journal::JournalError;
use crate::manifest::ManifestError;

/// Result type for session-level download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Session-level failures that abort a download before it starts.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The manifest could not be loaded.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The mirror root could not be created.
    #[error("failed to create mirror root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),

    /// The session journal could not be written or read.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// How the worker pool reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Worth retrying: timeouts, resets, 5xx, 429, truncated bodies.
    Transient,
    /// Retrying cannot help: 404, 403 and other client errors.
    Permanent,
    /// The local disk refused the write.
    LocalIo,
}

/// Failure of one attempt to fetch one file.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete in time.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Connection-level failure (refused, reset, DNS, broken body stream).
    #[error("network error: {0}")]
    Network(String),

    /// The origin answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// The body length did not match the expected size.
    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The origin returned an empty body for a file.
    #[error("empty response body")]
    EmptyBody,

    /// Writing the file locally failed.
    #[error("failed to {operation} {path}: {source}")]
    LocalIo {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// Wrap a local I/O failure.
    pub fn local(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Classify the error for the retry loop.
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Timeout { .. } | Self::Network(_) | Self::SizeMismatch { .. } => {
                FetchErrorKind::Transient
            }
            Self::Status { status, .. } => {
                if *status >= 500 || *status == 408 || *status == 429 {
                    FetchErrorKind::Transient
                } else {
                    FetchErrorKind::Permanent
                }
            }
            Self::EmptyBody => FetchErrorKind::Permanent,
            Self::LocalIo { .. } => FetchErrorKind::LocalIo,
        }
    }

    /// Delay requested by the origin via `Retry-After`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the origin reported the file as not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Whether the error affects every remaining task, not just this one.
    pub fn is_systemic(&self) -> bool {
        match self {
            Self::LocalIo { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::ReadOnlyFilesystem
            ),
            _ => false,
        }
    }
}

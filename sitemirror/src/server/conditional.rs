//! Conditional request evaluation (`If-None-Match`, `If-Modified-Since`,
//! `If-Range`).
//!
//! Validators are derived from live file metadata on every request. The
//! ETag encodes mtime in nanoseconds and size, so a same-size edit that
//! keeps the mtime is not detected.

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

use http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE};
use http::HeaderMap;

use crate::http_date;

/// Whether the client's cached copy is still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Answer with 304 Not Modified.
    Fresh,
    /// Send the full representation.
    Stale,
}

/// ETag and Last-Modified for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileValidators {
    etag: String,
    last_modified: SystemTime,
    size: u64,
    mtime_nanos: u128,
}

impl FileValidators {
    /// Build validators from a size and modification time.
    pub fn new(size: u64, modified: SystemTime) -> Self {
        let mtime_nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            etag: format!("\"{:x}-{:x}\"", mtime_nanos, size),
            last_modified: http_date::truncate_to_secs(modified),
            size,
            mtime_nanos,
        }
    }

    /// Build validators from file metadata.
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self::new(meta.len(), meta.modified().unwrap_or(UNIX_EPOCH))
    }

    /// Strong ETag, quotes included.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Modification time truncated to whole seconds.
    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    /// `Last-Modified` header value.
    pub fn last_modified_header(&self) -> String {
        http_date::format(self.last_modified)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification time in nanoseconds since the epoch.
    pub fn mtime_nanos(&self) -> u128 {
        self.mtime_nanos
    }
}

/// Decide whether a GET or HEAD can be answered with 304.
///
/// `If-None-Match` takes precedence; `If-Modified-Since` is consulted only
/// when it is absent.
pub fn evaluate(headers: &HeaderMap, validators: &FileValidators) -> Freshness {
    let if_none_match: Vec<&str> = headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if !if_none_match.is_empty() {
        let fresh = if_none_match
            .iter()
            .any(|value| etag_list_matches(value, validators.etag()));
        return if fresh {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
    }

    let since = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(http_date::parse);
    match since {
        Some(since) if validators.last_modified() <= since => Freshness::Fresh,
        _ => Freshness::Stale,
    }
}

/// Whether a `Range` request may be served as a range under `If-Range`.
///
/// Without `If-Range` the range always applies. With it, the range applies
/// only if the validator still matches; otherwise the full body is sent.
pub fn if_range_allows(headers: &HeaderMap, validators: &FileValidators) -> bool {
    let Some(value) = headers.get(IF_RANGE).and_then(|v| v.to_str().ok()) else {
        return headers.get(IF_RANGE).is_none();
    };
    let value = value.trim();
    if value.starts_with('"') || value.starts_with("W/") {
        return strong_eq(value, validators.etag());
    }
    http_date::parse(value) == Some(validators.last_modified())
}

/// Match a comma-separated `If-None-Match` list against `etag`.
fn etag_list_matches(list: &str, etag: &str) -> bool {
    list.split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || strong_eq(candidate, etag))
}

/// Strong comparison: weak tags never match.
fn strong_eq(candidate: &str, etag: &str) -> bool {
    !candidate.starts_with("W/") && candidate == etag
}

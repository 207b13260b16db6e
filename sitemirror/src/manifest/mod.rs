//! The mirror manifest: the authoritative list of files in a complete mirror.
//!
//! A manifest is UTF-8 text with one relative path per line. Blank lines and
//! `#` comments are ignored, a leading `/` is stripped, and duplicates are
//! dropped keeping the first occurrence. A line may carry the expected size
//! after a TAB (`images/logo.png<TAB>10240`).

mod diff;

pub use diff::{compute_missing, DiffReport, FetchTask, RejectedEntry};

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use thiserror::Error;

/// Errors that can occur while loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One file of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    path: String,
    expected_size: Option<u64>,
}

impl ManifestEntry {
    /// Create an entry without an expected size.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_size: None,
        }
    }

    /// Create an entry that must have the given size once downloaded.
    pub fn with_size(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            expected_size: Some(size),
        }
    }

    /// The relative path as written in the manifest.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Expected size in bytes, if the manifest declares one.
    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    /// Grouping key used by `status`: the first two segments of deep paths,
    /// otherwise the first segment.
    pub fn category(&self) -> String {
        let parts: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        if parts.len() > 2 {
            parts[..2].join("/")
        } else {
            parts[0].to_string()
        }
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Ordered, deduplicated set of manifest entries.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse manifest text.
    pub fn parse(text: &str) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (path, expected_size) = match line.split_once('\t') {
                Some((path, size)) => (path.trim_end(), size.trim().parse::<u64>().ok()),
                None => (line, None),
            };
            let path = path.trim_start_matches('/');
            if path.is_empty() || !seen.insert(path.to_string()) {
                continue;
            }

            entries.push(ManifestEntry {
                path: path.to_string(),
                expected_size,
            });
        }

        Self { entries }
    }

    /// Build a manifest from entries, deduplicating by path.
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|e| seen.insert(e.path.clone()))
            .collect();
        Self { entries }
    }

    /// Entries in manifest order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

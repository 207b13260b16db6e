//! Reconciliation of a manifest against the files already on disk.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::{Manifest, ManifestEntry};
use crate::path_policy::{PathError, PathPolicy};

/// One file that still has to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    /// The manifest entry being fetched.
    pub entry: ManifestEntry,
    /// Final location under the mirror root.
    pub destination: PathBuf,
    /// Origin URL.
    pub remote_url: String,
    /// Attempts made so far.
    pub attempts: u32,
}

/// An entry the path policy refused to map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub entry: ManifestEntry,
    pub error: PathError,
}

/// Outcome of comparing a manifest with the mirror directory.
#[derive(Debug, Clone, Default)]
pub struct DiffReport {
    /// Missing entries, in manifest order.
    pub tasks: Vec<FetchTask>,
    /// Entries already present with a non-zero size.
    pub present: usize,
    /// Total size of the present entries.
    pub present_bytes: u64,
    /// Entries with unsafe or malformed paths.
    pub rejected: Vec<RejectedEntry>,
}

impl DiffReport {
    /// Whether nothing needs to be downloaded.
    pub fn is_complete(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Compute the fetch tasks for every manifest entry missing from disk.
///
/// An entry is missing when its file does not exist or has zero length;
/// a zero-byte file never counts as downloaded.
pub fn compute_missing(manifest: &Manifest, policy: &PathPolicy) -> DiffReport {
    let mut report = DiffReport::default();

    for entry in manifest.entries() {
        let resolved = match policy.resolve(entry.path()) {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(entry = %entry, error = %error, "Skipping manifest entry");
                report.rejected.push(RejectedEntry {
                    entry: entry.clone(),
                    error,
                });
                continue;
            }
        };

        match fs::metadata(&resolved.local) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                report.present += 1;
                report.present_bytes += meta.len();
            }
            _ => report.tasks.push(FetchTask {
                entry: entry.clone(),
                destination: resolved.local,
                remote_url: resolved.remote_url,
                attempts: 0,
            }),
        }
    }

    debug!(
        total = manifest.len(),
        present = report.present,
        missing = report.tasks.len(),
        rejected = report.rejected.len(),
        "Computed manifest diff"
    );
    report
}

//! Offline report on how complete the mirror is.

use std::collections::HashMap;

use crate::download::{Journal, JournalResult, SessionJournal};
use crate::manifest::{compute_missing, Manifest};
use crate::path_policy::PathPolicy;

/// How many missing categories the report lists.
pub const TOP_CATEGORIES: usize = 15;

/// Mirror completeness, computed from the manifest and the disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorStatus {
    /// Entries in the manifest.
    pub total: usize,
    /// Entries present with a non-zero size.
    pub present: usize,
    /// Total size of present entries.
    pub present_bytes: u64,
    /// Entries still missing (rejected entries included).
    pub missing: usize,
    /// Missing entry counts per category, largest first.
    pub categories: Vec<(String, usize)>,
    /// The last recorded download session, if any.
    pub last_session: Option<SessionJournal>,
}

impl MirrorStatus {
    /// Compute the status of the mirror described by `policy`.
    pub fn compute(manifest: &Manifest, policy: &PathPolicy, journal: &Journal) -> JournalResult<Self> {
        let report = compute_missing(manifest, policy);

        let mut counts: HashMap<String, usize> = HashMap::new();
        let missing_entries = report
            .tasks
            .iter()
            .map(|t| &t.entry)
            .chain(report.rejected.iter().map(|r| &r.entry));
        for entry in missing_entries {
            *counts.entry(entry.category()).or_default() += 1;
        }

        let mut categories: Vec<(String, usize)> = counts.into_iter().collect();
        // Ties broken by name so the report is stable
        categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        categories.truncate(TOP_CATEGORIES);

        Ok(Self {
            total: manifest.len(),
            present: report.present,
            present_bytes: report.present_bytes,
            missing: report.tasks.len() + report.rejected.len(),
            categories,
            last_session: journal.load()?,
        })
    }

    /// Percentage of manifest entries present, 0 to 100.
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.present as f64 * 100.0 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_status_counts_and_categories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("site");
        fs::create_dir_all(root.join("sr/char")).unwrap();
        fs::write(root.join("sr/char/1.json"), b"12345").unwrap();
        fs::write(root.join("sr/char/2.json"), b"").unwrap();

        let manifest = Manifest::parse(
            "sr/char/1.json\nsr/char/2.json\nsr/char/3.json\nsr/lc/1.json\nfavicon.ico\n",
        );
        let policy = PathPolicy::new(&root, "https://origin.test");
        let status = MirrorStatus::compute(&manifest, &policy, &Journal::new(dir.path())).unwrap();

        assert_eq!(status.total, 5);
        assert_eq!(status.present, 1);
        assert_eq!(status.present_bytes, 5);
        assert_eq!(status.missing, 4);
        assert_eq!(status.percent_complete(), 20.0);
        assert_eq!(
            status.categories,
            vec![
                ("sr/char".to_string(), 2),
                ("favicon.ico".to_string(), 1),
                ("sr/lc".to_string(), 1),
            ]
        );
        assert!(status.last_session.is_none());
    }

    #[test]
    fn test_empty_manifest_is_complete() {
        let dir = TempDir::new().unwrap();
        let policy = PathPolicy::new(dir.path(), "https://origin.test");
        let status =
            MirrorStatus::compute(&Manifest::default(), &policy, &Journal::new(dir.path())).unwrap();
        assert_eq!(status.percent_complete(), 100.0);
        assert!(status.categories.is_empty());
    }
}

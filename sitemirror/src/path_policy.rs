//! Mapping between manifest entries, mirror paths and origin URLs.
//!
//! `PathPolicy` is the only place that turns an untrusted relative path into
//! a filesystem location. The downloader uses [`PathPolicy::resolve`] for its
//! write targets and the server uses [`PathPolicy::resolve_request`] for its
//! read targets, so both sides share one set of traversal rules.
//!
//! The on-disk layout is path-for-path identical to the origin: the entry
//! `sr/char/1001/index.html` lives at `<root>/sr/char/1001/index.html` and is
//! served at `/sr/char/1001/index.html`.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

/// Characters left unescaped when building origin URLs.
///
/// Matches the RFC 3986 path-safe set; `%` is kept so entries that are
/// already percent-encoded are not double-escaped.
const PATH_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b':')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'%');

/// Directory index file name used by the origin's route layout.
pub const INDEX_FILE: &str = "index.html";

/// Result type for path policy operations.
pub type PathResult<T> = Result<T, PathError>;

/// Errors raised for entries or request paths that cannot be mapped safely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path is malformed or would escape the mirror root.
    #[error("invalid path {entry:?}: {reason}")]
    InvalidPath { entry: String, reason: &'static str },
}

impl PathError {
    fn invalid(entry: &str, reason: &'static str) -> Self {
        Self::InvalidPath {
            entry: entry.to_string(),
            reason,
        }
    }
}

/// Local and remote locations for one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Destination under the mirror root.
    pub local: PathBuf,
    /// Origin URL to fetch the entry from.
    pub remote_url: String,
}

/// Traversal-safe mapping rooted at a mirror directory and an origin base URL.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    root: PathBuf,
    base_url: String,
}

impl PathPolicy {
    /// Create a policy for the given mirror root and origin base URL.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            base_url,
        }
    }

    /// The mirror root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The origin base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a manifest entry to its destination path and origin URL.
    pub fn resolve(&self, entry: &str) -> PathResult<ResolvedPath> {
        let segments = normalized_segments(entry)?;
        let local = self.join(&segments);
        let remote_url = self.remote_url(&segments);
        Ok(ResolvedPath { local, remote_url })
    }

    /// Resolve only the local destination of a manifest entry.
    pub fn local_path(&self, entry: &str) -> PathResult<PathBuf> {
        let segments = normalized_segments(entry)?;
        Ok(self.join(&segments))
    }

    /// Resolve an HTTP request target to an existing file under the root.
    ///
    /// Returns `Ok(None)` when no file matches. The percent-decoded path is
    /// tried first, then the raw path for files whose names on disk are
    /// themselves percent-encoded. `/` maps to `index/index.html` and a
    /// directory maps to its `index.html`.
    pub fn resolve_request(&self, target: &str) -> PathResult<Option<PathBuf>> {
        let raw = target.split(['?', '#']).next().unwrap_or_default();
        let decoded = percent_decode_str(raw).decode_utf8_lossy();

        let mut candidates: Vec<Cow<'_, str>> = vec![decoded.clone()];
        if decoded != raw {
            candidates.push(Cow::Borrowed(raw));
        }

        for candidate in candidates {
            let stripped = candidate.trim_start_matches('/');
            if stripped.is_empty() {
                let index = self.root.join("index").join(INDEX_FILE);
                if index.is_file() {
                    return Ok(Some(index));
                }
                continue;
            }

            let segments = normalized_segments(stripped)?;
            let path = self.join(&segments);
            let file = if path.is_file() {
                path
            } else if path.join(INDEX_FILE).is_file() {
                path.join(INDEX_FILE)
            } else {
                continue;
            };

            self.confine(stripped, &file)?;
            return Ok(Some(file));
        }

        Ok(None)
    }

    /// Reject files whose canonical location lies outside the root.
    ///
    /// Catches symlinks inside the mirror that point elsewhere.
    fn confine(&self, entry: &str, file: &Path) -> PathResult<()> {
        let root = self
            .root
            .canonicalize()
            .map_err(|_| PathError::invalid(entry, "mirror root unavailable"))?;
        let resolved = file
            .canonicalize()
            .map_err(|_| PathError::invalid(entry, "unresolvable path"))?;
        if resolved.starts_with(&root) {
            Ok(())
        } else {
            Err(PathError::invalid(entry, "escapes mirror root"))
        }
    }

    fn join(&self, segments: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        for segment in segments {
            path.push(segment);
        }
        path
    }

    fn remote_url(&self, segments: &[&str]) -> String {
        let mut request_path = segments.join("/");
        // The origin serves directory routes, not their index files.
        if request_path.ends_with(&format!("/{}", INDEX_FILE)) {
            request_path.truncate(request_path.len() - INDEX_FILE.len());
        }
        format!(
            "{}/{}",
            self.base_url,
            utf8_percent_encode(&request_path, PATH_SAFE)
        )
    }
}

/// Split an entry into safe path segments.
///
/// Empty and `.` segments are dropped; anything that could change directory
/// outside the root is an error.
fn normalized_segments(entry: &str) -> PathResult<Vec<&str>> {
    if entry.is_empty() {
        return Err(PathError::invalid(entry, "empty path"));
    }
    if entry.starts_with('/') {
        return Err(PathError::invalid(entry, "absolute path"));
    }
    if entry.contains('\\') {
        return Err(PathError::invalid(entry, "backslash separator"));
    }
    if entry.contains('\0') {
        return Err(PathError::invalid(entry, "NUL byte"));
    }

    let mut segments = Vec::new();
    for (index, segment) in entry.split('/').enumerate() {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::invalid(entry, "parent directory segment")),
            _ => {}
        }
        if index == 0 && segment.ends_with(':') {
            return Err(PathError::invalid(entry, "drive prefix"));
        }

        let decoded = percent_decode_str(segment).decode_utf8_lossy();
        if decoded.contains('/') || decoded.contains('\\') {
            return Err(PathError::invalid(entry, "encoded separator"));
        }
        if decoded == ".." {
            return Err(PathError::invalid(entry, "encoded parent directory segment"));
        }
        if decoded.contains('\0') {
            return Err(PathError::invalid(entry, "encoded NUL byte"));
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        return Err(PathError::invalid(entry, "empty path"));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn policy(root: &Path) -> PathPolicy {
        PathPolicy::new(root, "https://example.org/")
    }

    #[test]
    fn test_resolve_joins_root_and_base_url() {
        let policy = PathPolicy::new("/srv/site", "https://example.org");
        let resolved = policy.resolve("data/EN/avatar.js").unwrap();

        assert_eq!(resolved.local, PathBuf::from("/srv/site/data/EN/avatar.js"));
        assert_eq!(resolved.remote_url, "https://example.org/data/EN/avatar.js");
    }

    #[test]
    fn test_resolve_maps_index_to_directory_url() {
        let policy = PathPolicy::new("/srv/site", "https://example.org");
        let resolved = policy.resolve("sr/char/1001/index.html").unwrap();

        assert_eq!(
            resolved.local,
            PathBuf::from("/srv/site/sr/char/1001/index.html")
        );
        assert_eq!(resolved.remote_url, "https://example.org/sr/char/1001/");
    }

    #[test]
    fn test_resolve_encodes_unsafe_characters() {
        let policy = PathPolicy::new("/srv/site", "https://example.org");
        let resolved = policy.resolve("images/a b#c.png").unwrap();
        assert_eq!(resolved.remote_url, "https://example.org/images/a%20b%23c.png");

        // Existing escapes are kept as-is
        let resolved = policy.resolve("images/a%20b.png").unwrap();
        assert_eq!(resolved.remote_url, "https://example.org/images/a%20b.png");
    }

    #[test]
    fn test_resolve_normalizes_dot_and_empty_segments() {
        let policy = PathPolicy::new("/srv/site", "https://example.org");
        let resolved = policy.resolve("./css//main.css").unwrap();
        assert_eq!(resolved.local, PathBuf::from("/srv/site/css/main.css"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let policy = PathPolicy::new("/srv/site", "https://example.org");

        for entry in [
            "",
            ".",
            "../etc/passwd",
            "a/../../b",
            "/etc/passwd",
            "a\\..\\b",
            "a/%2e%2e/b",
            "a%2fb",
            "a%5Cb",
            "C:/windows",
            "a\0b",
        ] {
            let result = policy.resolve(entry);
            assert!(
                matches!(result, Err(PathError::InvalidPath { .. })),
                "expected {:?} to be rejected, got {:?}",
                entry,
                result
            );
        }
    }

    #[test]
    fn test_resolve_request_finds_files_and_indexes() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("index")).unwrap();
        fs::write(dir.path().join("index/index.html"), "home").unwrap();
        fs::create_dir_all(dir.path().join("sr/char")).unwrap();
        fs::write(dir.path().join("sr/char/index.html"), "chars").unwrap();
        fs::write(dir.path().join("sr/a b.js"), "spaced").unwrap();

        let policy = policy(dir.path());

        assert_eq!(
            policy.resolve_request("/").unwrap(),
            Some(dir.path().join("index/index.html"))
        );
        assert_eq!(
            policy.resolve_request("/sr/char/?lang=en").unwrap(),
            Some(dir.path().join("sr/char/index.html"))
        );
        assert_eq!(
            policy.resolve_request("/sr/a%20b.js").unwrap(),
            Some(dir.path().join("sr/a b.js"))
        );
        assert_eq!(policy.resolve_request("/missing.js").unwrap(), None);
    }

    #[test]
    fn test_resolve_request_falls_back_to_raw_encoded_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("%E5%9B%BE.png"), "raw").unwrap();

        let policy = policy(dir.path());
        assert_eq!(
            policy.resolve_request("/%E5%9B%BE.png").unwrap(),
            Some(dir.path().join("%E5%9B%BE.png"))
        );
    }

    #[test]
    fn test_resolve_request_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let policy = policy(dir.path());

        assert!(policy.resolve_request("/../secret").is_err());
        assert!(policy.resolve_request("/%2e%2e/secret").is_err());
        assert!(policy.resolve_request("/a/%2e%2e%2f%2e%2e/secret").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_request_rejects_symlink_out_of_root() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let policy = policy(dir.path());
        assert!(policy.resolve_request("/link/secret.txt").is_err());
    }

    proptest! {
        #[test]
        fn prop_accepted_entries_stay_under_root(segments in prop::collection::vec("[a-zA-Z0-9._%-]{1,8}", 1..6)) {
            let entry = segments.join("/");
            let policy = PathPolicy::new("/srv/site", "https://example.org");
            if let Ok(resolved) = policy.resolve(&entry) {
                prop_assert!(resolved.local.starts_with("/srv/site"));
                prop_assert!(resolved
                    .local
                    .components()
                    .all(|c| c != std::path::Component::ParentDir));
            }
        }

        #[test]
        fn prop_parent_segment_always_rejected(prefix in "[a-z]{1,6}", suffix in "[a-z]{1,6}") {
            let policy = PathPolicy::new("/srv/site", "https://example.org");
            let entry = format!("{}/../{}", prefix, suffix);
            prop_assert!(policy.resolve(&entry).is_err());
        }
    }
}

//! Write-then-rename for mirror files.
//!
//! Data goes to a hidden temporary sibling of the destination
//! (`.name.XXXXXX.part`) and is renamed over the destination only once it is
//! complete. Dropping an unfinished [`AtomicWrite`] deletes the temporary
//! file, so an interrupted download never leaves a partial file where a
//! complete one is expected. A killed process skips that cleanup;
//! [`sweep_stale_parts`] removes what it left behind.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Suffix of temporary files.
pub const PART_SUFFIX: &str = ".part";

/// An in-progress atomic write.
#[derive(Debug)]
pub struct AtomicWrite {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl AtomicWrite {
    /// Create the temporary file next to `destination`, creating parent
    /// directories as needed.
    pub fn create(destination: &Path) -> io::Result<Self> {
        let parent = destination
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
        fs::create_dir_all(parent)?;

        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(PART_SUFFIX)
            .tempfile_in(parent)?;

        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    /// Path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Final destination.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Flush and rename the temporary file over the destination.
    pub fn commit(mut self) -> io::Result<()> {
        self.temp.flush()?;
        self.temp
            .persist(&self.destination)
            .map_err(|e| e.error)?;
        Ok(())
    }
}

impl Write for AtomicWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Atomically replace `destination` with `contents`.
pub fn write_atomic(destination: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = AtomicWrite::create(destination)?;
    file.write_all(contents)?;
    file.commit()
}

/// Whether `file_name` is a temporary file for a destination named `name`.
fn is_part_of(file_name: &str, name: &str) -> bool {
    let prefix = format!(".{}.", name);
    file_name.len() > prefix.len() + PART_SUFFIX.len()
        && file_name.starts_with(&prefix)
        && file_name.ends_with(PART_SUFFIX)
}

/// Delete temporary files left next to `destinations` by an earlier
/// process. Each parent directory is read once. Returns how many files
/// were removed.
///
/// Must not run while writes to these destinations are in flight.
pub fn sweep_stale_parts<'a>(destinations: impl IntoIterator<Item = &'a Path>) -> usize {
    let mut by_dir: HashMap<&Path, HashSet<String>> = HashMap::new();
    for destination in destinations {
        if let (Some(parent), Some(name)) = (destination.parent(), destination.file_name()) {
            by_dir
                .entry(parent)
                .or_default()
                .insert(name.to_string_lossy().into_owned());
        }
    }

    let mut removed = 0;
    for (dir, names) in by_dir {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot scan for leftover partial files");
                continue;
            }
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(PART_SUFFIX) || !names.iter().any(|n| is_part_of(&file_name, n)) {
                continue;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(path = %entry.path().display(), "Removed leftover partial file");
                    removed += 1;
                }
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove partial file"),
            }
        }
    }
    removed
}

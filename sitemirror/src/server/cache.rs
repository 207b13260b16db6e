//! Bounded cache of gzip-compressed representations.
//!
//! Wraps `moka::sync::Cache` weighted by byte size with plain LRU eviction.
//! Keys carry the file fingerprint (size and mtime), so a modified file is a
//! miss and stale entries simply age out. Values are `Bytes`, so a response
//! still streaming an evicted entry keeps its own reference.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use moka::policy::EvictionPolicy;
use moka::sync::Cache as MokaCache;
use tracing::trace;

use super::conditional::FileValidators;
use super::content_type::is_compressible;

/// Default cache budget (64 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Files smaller than this are sent uncompressed.
pub const DEFAULT_MIN_COMPRESS_BYTES: u64 = 256;

/// Files larger than this are streamed uncompressed.
pub const DEFAULT_MAX_COMPRESS_BYTES: u64 = 4 * 1024 * 1024;

/// Gzip level used for all compressed representations.
const GZIP_LEVEL: u32 = 6;

/// Cache sizing and compression thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Byte budget for all cached representations.
    pub max_bytes: u64,
    /// Minimum file size eligible for compression.
    pub min_compress_bytes: u64,
    /// Maximum file size eligible for compression.
    pub max_compress_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            min_compress_bytes: DEFAULT_MIN_COMPRESS_BYTES,
            max_compress_bytes: DEFAULT_MAX_COMPRESS_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_compress_range(mut self, min: u64, max: u64) -> Self {
        self.min_compress_bytes = min;
        self.max_compress_bytes = max;
        self
    }
}

/// Content encoding of a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Identity,
    Gzip,
}

/// File identity used to invalidate cached representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime_nanos: u128,
}

impl From<&FileValidators> for Fingerprint {
    fn from(validators: &FileValidators) -> Self {
        Self {
            size: validators.size(),
            mtime_nanos: validators.mtime_nanos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    encoding: Encoding,
    fingerprint: Fingerprint,
}

/// What the response body should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    /// Stream the file as stored.
    Identity,
    /// Send these gzip bytes.
    Gzip(Bytes),
}

/// Counters for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub weighted_bytes: u64,
}

/// Shared compression cache. One instance per server, passed as `Arc`.
pub struct CacheLayer {
    cache: MokaCache<CacheKey, Bytes>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheLayer {
    pub fn new(config: CacheConfig) -> Self {
        let cache = MokaCache::builder()
            .weigher(|key: &CacheKey, value: &Bytes| -> u32 {
                let weight = value.len() + key.path.as_os_str().len();
                weight.min(u32::MAX as usize) as u32
            })
            .max_capacity(config.max_bytes)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether a file of `size` bytes at `path` is sent gzip-encoded to
    /// clients that accept it.
    pub fn is_eligible(&self, path: &Path, size: u64) -> bool {
        is_compressible(path)
            && size >= self.config.min_compress_bytes
            && size <= self.config.max_compress_bytes
    }

    /// Pick the representation for a request.
    ///
    /// Eligible files requested with gzip come from the cache, compressed on
    /// a miss. Concurrent misses for the same key compress once.
    pub fn get_or_compress(
        &self,
        path: &Path,
        fingerprint: Fingerprint,
        accepts_gzip: bool,
    ) -> io::Result<Representation> {
        if !accepts_gzip || !self.is_eligible(path, fingerprint.size) {
            return Ok(Representation::Identity);
        }

        // Never admit an entry that could not fit the budget
        if fingerprint.size > self.config.max_bytes {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return compress_file(path).map(Representation::Gzip);
        }

        let key = CacheKey {
            path: path.to_path_buf(),
            encoding: Encoding::Gzip,
            fingerprint,
        };
        let mut computed = false;
        let bytes = self
            .cache
            .try_get_with(key, || {
                computed = true;
                compress_file(path)
            })
            .map_err(|e: Arc<io::Error>| io::Error::new(e.kind(), e.to_string()))?;

        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.cache.run_pending_tasks();
            trace!(path = %path.display(), compressed = bytes.len(), "Compressed into cache");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Representation::Gzip(bytes))
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
            weighted_bytes: self.cache.weighted_size(),
        }
    }

    /// Run pending evictions.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

/// Deterministic gzip (header mtime is zero).
pub fn gzip(data: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(GZIP_LEVEL));
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

fn compress_file(path: &Path) -> io::Result<Bytes> {
    gzip(&fs::read(path)?)
}

//! Tracing subscriber setup for the binary.
//!
//! Library code only emits `tracing` events; this is called once at
//! startup. `RUST_LOG` takes precedence over the configured level.

use std::io;
use std::path::Path;

use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Prefix of the daily rolling log files.
pub const LOG_FILE_PREFIX: &str = "sitemirror.log";

/// Build the filter from `RUST_LOG`, falling back to `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_LEVEL))
}

/// RFC 3339 timestamps at the local offset, or UTC if it is unknown.
///
/// The offset is read once here. On Unix it can only be read while the
/// process is single-threaded, so build the timer before spawning anything.
pub fn timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

/// Install the global subscriber.
///
/// Events go to stderr, and additionally to a daily rolling file in
/// `directory` when one is given. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init(level: &str, directory: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let timer = timer();
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(timer.clone())
        .with_target(false);

    let (file_layer, guard) = match directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(timer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        // A subscriber is already set (tests, embedding); keep it
        return Ok(None);
    }
    Ok(guard)
}

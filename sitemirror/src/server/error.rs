//! Error types for the static server.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for server startup and shutdown.
pub type ServerResult<T> = Result<T, ServerError>;

/// Fatal server conditions. Per-request failures become HTTP responses
/// instead.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The TLS certificate or key could not be loaded.
    #[error("TLS configuration error for {path}: {reason}")]
    Tls { path: PathBuf, reason: String },

    /// The engine's runtime or worker threads could not be started.
    #[error("failed to start server runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The engine was used in the wrong state.
    #[error("server engine {engine} is {state}")]
    State {
        engine: &'static str,
        state: &'static str,
    },

    /// Other socket I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}

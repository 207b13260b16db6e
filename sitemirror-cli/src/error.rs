//! CLI error type.

use std::fmt;

use sitemirror::config::ConfigError;
use sitemirror::download::{DownloadError, JournalError};
use sitemirror::manifest::ManifestError;
use sitemirror::server::ServerError;

/// Errors that end a command with a non-zero exit status.
#[derive(Debug)]
pub enum CliError {
    /// Missing or contradictory settings.
    Config(String),
    /// The config file could not be loaded.
    ConfigFile(ConfigError),
    /// The download session could not start or finish.
    Download(DownloadError),
    /// The manifest could not be read.
    Manifest(ManifestError),
    /// The journal could not be read.
    Journal(JournalError),
    /// The server could not start or stop.
    Serve(ServerError),
    /// Logging or terminal I/O failed.
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Download(e) => write!(f, "{}", e),
            CliError::Manifest(e) => write!(f, "{}", e),
            CliError::Journal(e) => write!(f, "{}", e),
            CliError::Serve(e) => write!(f, "{}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::ConfigFile(e) => Some(e),
            CliError::Download(e) => Some(e),
            CliError::Manifest(e) => Some(e),
            CliError::Journal(e) => Some(e),
            CliError::Serve(e) => Some(e),
            CliError::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        CliError::Download(e)
    }
}

impl From<ManifestError> for CliError {
    fn from(e: ManifestError) -> Self {
        CliError::Manifest(e)
    }
}

impl From<JournalError> for CliError {
    fn from(e: JournalError) -> Self {
        CliError::Journal(e)
    }
}

impl From<ServerError> for CliError {
    fn from(e: ServerError) -> Self {
        CliError::Serve(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

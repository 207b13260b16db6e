//! The seam between the worker pool and the network.

use std::io::Read;

use super::error::FetchError;

/// A successful response whose body has not been read yet.
pub struct FetchResponse {
    /// `Content-Length` announced by the origin, if any.
    pub content_length: Option<u64>,
    /// Streaming body.
    pub body: Box<dyn Read + Send>,
}

impl FetchResponse {
    /// Wrap an in-memory body, announcing its length.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            content_length: Some(bytes.len() as u64),
            body: Box::new(std::io::Cursor::new(bytes)),
        }
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Performs GET requests for the worker pool.
///
/// Implementations return `Err` for any non-success status so that the
/// pool can classify it with [`FetchError::kind`].
pub trait Fetcher: Send + Sync {
    /// Request `url` and return the response body stream.
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

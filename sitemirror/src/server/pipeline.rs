//! Engine-independent request handling.
//!
//! Both engines turn a socket request into a [`SiteRequest`], call
//! [`RequestPipeline::handle`] and write the returned [`SiteResponse`]. All
//! HTTP semantics (routing, validators, ranges, compression, headers) live
//! here so the engines only differ in how they move bytes.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{
    HeaderName, HeaderValue, ACCEPT_ENCODING, ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW,
    CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    LAST_MODIFIED, RANGE, SERVER, VARY,
};
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, error};

use super::cache::{CacheLayer, Fingerprint, Representation};
use super::cache_control::CacheControlPolicy;
use super::conditional::{evaluate, if_range_allows, FileValidators, Freshness};
use super::content_type::{content_type_for, is_compressible};
use crate::path_policy::PathPolicy;

/// A parsed request, independent of the engine that received it.
#[derive(Debug, Clone)]
pub struct SiteRequest {
    pub method: Method,
    /// Request target as sent (path, optional query).
    pub target: String,
    pub headers: HeaderMap,
}

impl SiteRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Add a header, ignoring values that are not valid header text.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }
}

/// Body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// No body (HEAD, 304).
    Empty,
    /// In-memory bytes (compressed representations, error texts).
    Bytes(Bytes),
    /// `len` bytes of `path` starting at `offset`, streamed by the engine.
    File { path: PathBuf, offset: u64, len: u64 },
}

/// A complete response: status, headers (with `Content-Length`) and body.
#[derive(Debug, Clone)]
pub struct SiteResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl SiteResponse {
    fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    fn header(&mut self, name: HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
    }

    fn content_length(&mut self, len: u64) {
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }

    /// Whether the engine should expect a body.
    pub fn has_body(&self) -> bool {
        !matches!(self.body, ResponseBody::Empty)
    }
}

/// Outcome of matching a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeSpec {
    /// No usable range: send the whole file.
    Full,
    /// Inclusive byte range.
    Partial { start: u64, end: u64 },
    /// Syntactically valid but outside the file.
    Unsatisfiable,
}

/// Shared request handler. One instance per server, passed as `Arc`.
pub struct RequestPipeline {
    policy: PathPolicy,
    cache: Arc<CacheLayer>,
    cache_control: CacheControlPolicy,
    server_name: String,
}

impl RequestPipeline {
    pub fn new(policy: PathPolicy, cache: Arc<CacheLayer>, cache_control: CacheControlPolicy) -> Self {
        Self {
            policy,
            cache,
            cache_control,
            server_name: format!("SiteMirror/{}", crate::VERSION),
        }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Produce the response for one request.
    pub fn handle(&self, request: &SiteRequest) -> SiteResponse {
        let response = self.route(request);
        debug!(
            method = %request.method,
            target = %request.target,
            status = response.status.as_u16(),
            "Handled request"
        );
        response
    }

    fn route(&self, request: &SiteRequest) -> SiteResponse {
        let head = request.method == Method::HEAD;
        if request.method != Method::GET && !head {
            let mut response = self.error(StatusCode::METHOD_NOT_ALLOWED, false);
            response.header(ALLOW, "GET, HEAD");
            return response;
        }

        let file = match self.policy.resolve_request(&request.target) {
            Ok(Some(file)) => file,
            Ok(None) => return self.error(StatusCode::NOT_FOUND, head),
            Err(e) => {
                debug!(target = %request.target, error = %e, "Rejected request path");
                return self.error(StatusCode::FORBIDDEN, head);
            }
        };
        let meta = match fs::metadata(&file) {
            Ok(meta) if meta.is_file() => meta,
            _ => return self.error(StatusCode::NOT_FOUND, head),
        };

        let validators = FileValidators::from_metadata(&meta);
        let size = validators.size();
        let relative = file
            .strip_prefix(self.policy.root())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let compressible = is_compressible(&file);

        // One strong ETag per resource (mtime and size), shared by the gzip
        // and identity bodies. Ranges, If-Range included, are cut from the
        // identity bytes only.
        let mut response = SiteResponse::new(StatusCode::OK);
        response.header(ETAG, validators.etag());
        response.header(LAST_MODIFIED, &validators.last_modified_header());
        response.header(CACHE_CONTROL, self.cache_control.directive_for(&relative));
        if compressible {
            response.header(VARY, "Accept-Encoding");
        }
        response.header(ACCESS_CONTROL_ALLOW_ORIGIN, "*");
        response.header(SERVER, &self.server_name);

        if evaluate(&request.headers, &validators) == Freshness::Fresh {
            response.status = StatusCode::NOT_MODIFIED;
            return response;
        }

        response.header(CONTENT_TYPE, content_type_for(&file));
        response.header(ACCEPT_RANGES, "bytes");

        let range = match request.headers.get(RANGE).and_then(|v| v.to_str().ok()) {
            Some(value) if if_range_allows(&request.headers, &validators) => parse_range(value, size),
            _ => RangeSpec::Full,
        };
        match range {
            RangeSpec::Partial { start, end } => {
                let len = end - start + 1;
                response.status = StatusCode::PARTIAL_CONTENT;
                response.header(CONTENT_RANGE, &format!("bytes {}-{}/{}", start, end, size));
                response.content_length(len);
                if !head {
                    response.body = ResponseBody::File {
                        path: file,
                        offset: start,
                        len,
                    };
                }
                return response;
            }
            RangeSpec::Unsatisfiable => {
                let mut response = self.error(StatusCode::RANGE_NOT_SATISFIABLE, head);
                response.header(CONTENT_RANGE, &format!("bytes */{}", size));
                return response;
            }
            RangeSpec::Full => {}
        }

        let representation = match self.cache.get_or_compress(
            &file,
            Fingerprint::from(&validators),
            accepts_gzip(&request.headers),
        ) {
            Ok(representation) => representation,
            Err(e) => {
                error!(path = %file.display(), error = %e, "Failed to read file for compression");
                return self.error(StatusCode::INTERNAL_SERVER_ERROR, head);
            }
        };

        match representation {
            Representation::Gzip(bytes) => {
                response.header(CONTENT_ENCODING, "gzip");
                response.content_length(bytes.len() as u64);
                if !head {
                    response.body = ResponseBody::Bytes(bytes);
                }
            }
            Representation::Identity => {
                response.content_length(size);
                if !head && size > 0 {
                    response.body = ResponseBody::File {
                        path: file,
                        offset: 0,
                        len: size,
                    };
                }
            }
        }
        response
    }

    /// Fixed-text error response. No path or detail is ever reflected.
    fn error(&self, status: StatusCode, head: bool) -> SiteResponse {
        let text = status.canonical_reason().unwrap_or("Error");
        let mut response = SiteResponse::new(status);
        response.header(CONTENT_TYPE, "text/plain; charset=utf-8");
        response.header(ACCESS_CONTROL_ALLOW_ORIGIN, "*");
        response.header(SERVER, &self.server_name);
        response.content_length(text.len() as u64);
        if !head {
            response.body = ResponseBody::Bytes(Bytes::from_static(text.as_bytes()));
        }
        response
    }
}

/// Whether `Accept-Encoding` lists gzip with a non-zero quality.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|item| {
            let mut parts = item.split(';').map(str::trim);
            let coding = parts.next().unwrap_or_default();
            if !coding.eq_ignore_ascii_case("gzip") && coding != "*" {
                return false;
            }
            !parts.any(|p| {
                p.strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q == 0.0)
            })
        })
}

/// Interpret a `Range` header for a file of `size` bytes.
///
/// Only single ranges are honoured; multi-range and malformed headers fall
/// back to the full body.
fn parse_range(value: &str, size: u64) -> RangeSpec {
    let Some(set) = value.trim().strip_prefix("bytes=") else {
        return RangeSpec::Full;
    };
    if set.contains(',') {
        return RangeSpec::Full;
    }
    let Some((first, last)) = set.trim().split_once('-') else {
        return RangeSpec::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: the last n bytes
        let Ok(n) = last.parse::<u64>() else {
            return RangeSpec::Full;
        };
        if n == 0 || size == 0 {
            return RangeSpec::Unsatisfiable;
        }
        let start = size.saturating_sub(n);
        return RangeSpec::Partial {
            start,
            end: size - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeSpec::Full;
    };
    let end = if last.is_empty() {
        u64::MAX
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return RangeSpec::Full,
        }
    };
    if start >= size {
        return RangeSpec::Unsatisfiable;
    }
    RangeSpec::Partial {
        start,
        end: end.min(size - 1),
    }
}

//! Static server for the mirror root.
//!
//! This module serves the downloaded tree over HTTP:
//! - Content types and compressibility by extension (`content_type`)
//! - ETag / Last-Modified validation (`conditional`)
//! - Tiered `Cache-Control` rules (`cache_control`)
//! - The bounded gzip cache (`cache`)
//! - Engine-independent request handling (`pipeline`)
//! - Two interchangeable engines behind one trait (`engine`, `threaded`,
//!   `async_engine`)
//!
//! # Architecture
//!
//! ```text
//! build_engine(ServerConfig)
//!         │
//!         ├── ThreadedEngine ── acceptor ─► bounded queue ─► worker threads
//!         │
//!         └── AsyncEngine ──── tokio runtime ─► hyper (h1 / h2 over TLS)
//!                                     │
//!                                     ▼
//!                            RequestPipeline (Arc)
//!                                     ├── PathPolicy
//!                                     ├── conditional::evaluate
//!                                     ├── CacheControlPolicy
//!                                     └── CacheLayer (Arc, moka)
//! ```

mod async_engine;
mod cache;
mod cache_control;
mod conditional;
mod content_type;
mod engine;
mod error;
mod pipeline;
mod threaded;
mod tls;

pub use async_engine::AsyncEngine;
pub use cache::{
    gzip, CacheConfig, CacheLayer, CacheStats, Encoding, Fingerprint, Representation,
    DEFAULT_MAX_BYTES, DEFAULT_MAX_COMPRESS_BYTES, DEFAULT_MIN_COMPRESS_BYTES,
};
pub use cache_control::{CacheControlPolicy, CacheRule, FALLBACK_DIRECTIVE};
pub use conditional::{evaluate, if_range_allows, FileValidators, Freshness};
pub use content_type::{content_type_for, is_compressible, DEFAULT_CONTENT_TYPE};
pub use engine::{
    bind_listener, build_engine, EngineKind, ServerConfig, ServerEngine, TlsPaths, DEFAULT_KEEP_ALIVE_SECS,
    DEFAULT_PORT, DEFAULT_QUEUE, DEFAULT_RUNTIME_THREADS, DEFAULT_THREADS,
};
pub use error::{ServerError, ServerResult};
pub use pipeline::{RequestPipeline, ResponseBody, SiteRequest, SiteResponse};
pub use threaded::{ThreadedEngine, MAX_HEAD_BYTES};
pub use tls::{load_server_config, ALPN_PROTOCOLS};

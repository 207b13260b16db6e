//! SiteMirror - resumable static-site mirroring and serving
//!
//! This library downloads the files named by a manifest from an origin into
//! a local mirror root, resuming where a previous run stopped, and serves
//! that root over HTTP with validators, ranges, tiered `Cache-Control` and
//! a bounded gzip cache.
//!
//! - [`manifest`] and [`path_policy`] decide what belongs in the mirror
//! - [`download`] fills the mirror with a bounded worker pool
//! - [`server`] serves it through a threaded or an async engine
//! - [`status`] summarises mirror completeness
//! - [`config`] and [`logging`] carry the ambient setup

pub mod config;
pub mod download;
pub mod http_date;
pub mod logging;
pub mod manifest;
pub mod path_policy;
pub mod server;
pub mod status;

/// Crate version, reported in the `Server` header and the CLI banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

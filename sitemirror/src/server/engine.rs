//! The engine seam and shared engine configuration.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::async_engine::AsyncEngine;
use super::error::{ServerError, ServerResult};
use super::pipeline::{RequestPipeline, SiteRequest, SiteResponse};
use super::threaded::ThreadedEngine;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default worker threads for the threaded engine.
pub const DEFAULT_THREADS: usize = 32;

/// Default pending-connection queue for the threaded engine.
pub const DEFAULT_QUEUE: usize = 128;

/// Default runtime threads for the async engine.
pub const DEFAULT_RUNTIME_THREADS: usize = 2;

/// Default idle keep-alive timeout in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;

/// Which concurrency engine serves connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// Blocking sockets with a fixed worker-thread pool.
    Threaded,
    /// Tokio runtime with hyper connections.
    #[default]
    Async,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threaded => "threaded",
            Self::Async => "async",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threaded" | "threads" => Ok(Self::Threaded),
            "async" => Ok(Self::Async),
            other => Err(format!("unknown engine '{}' (expected threaded or async)", other)),
        }
    }
}

/// PEM certificate chain and key for TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind; `None` binds dual-stack `[::]` with IPv4 fallback.
    pub bind: Option<IpAddr>,
    /// Port to listen on; 0 picks a free port.
    pub port: u16,
    /// Engine to use.
    pub engine: EngineKind,
    /// Worker threads (threaded engine).
    pub threads: usize,
    /// Connections allowed to wait for a worker (threaded engine).
    pub queue: usize,
    /// Runtime worker threads (async engine).
    pub runtime_threads: usize,
    /// TLS material (async engine only).
    pub tls: Option<TlsPaths>,
    /// Idle time before a keep-alive connection is closed.
    pub keep_alive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: None,
            port: DEFAULT_PORT,
            engine: EngineKind::default(),
            threads: DEFAULT_THREADS,
            queue: DEFAULT_QUEUE,
            runtime_threads: DEFAULT_RUNTIME_THREADS,
            tls: None,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
        }
    }
}

impl ServerConfig {
    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_queue(mut self, queue: usize) -> Self {
        self.queue = queue.max(1);
        self
    }

    pub fn with_runtime_threads(mut self, threads: usize) -> Self {
        self.runtime_threads = threads.max(1);
        self
    }

    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsPaths {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// A way of moving HTTP requests between sockets and the pipeline.
///
/// Chosen once at startup; every engine answers requests through the same
/// [`RequestPipeline`].
pub trait ServerEngine: Send {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Bind and start serving. Returns the bound address.
    fn start(&mut self) -> ServerResult<SocketAddr>;

    /// Answer one request without a socket.
    fn route_request(&self, request: &SiteRequest) -> SiteResponse;

    /// Stop accepting, finish in-flight requests and release the socket.
    fn shutdown(&mut self) -> ServerResult<()>;
}

/// Build the engine selected in `config`.
pub fn build_engine(config: ServerConfig, pipeline: Arc<RequestPipeline>) -> Box<dyn ServerEngine> {
    match config.engine {
        EngineKind::Threaded => Box::new(ThreadedEngine::new(config, pipeline)),
        EngineKind::Async => Box::new(AsyncEngine::new(config, pipeline)),
    }
}

/// Bind the listening socket.
///
/// Without an explicit address, `[::]` is tried first (dual-stack where the
/// OS allows it), then `0.0.0.0`.
pub fn bind_listener(bind: Option<IpAddr>, port: u16) -> ServerResult<TcpListener> {
    if let Some(ip) = bind {
        let addr = SocketAddr::new(ip, port);
        return TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source });
    }

    let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
    match TcpListener::bind(v6) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            debug!(error = %e, "IPv6 bind failed, falling back to IPv4");
            let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
            let listener =
                TcpListener::bind(v4).map_err(|source| ServerError::Bind { addr: v4, source })?;
            info!(addr = %v4, "Listening on IPv4 only");
            Ok(listener)
        }
    }
}

/// Loopback addresses that reach a listener bound to `addr`.
pub(crate) fn local_targets(addr: SocketAddr) -> Vec<SocketAddr> {
    if addr.ip().is_unspecified() {
        vec![
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port()),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port()),
        ]
    } else {
        vec![addr]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("threaded".parse::<EngineKind>().unwrap(), EngineKind::Threaded);
        assert_eq!(" ASYNC ".parse::<EngineKind>().unwrap(), EngineKind::Async);
        assert!("fibers".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::default().to_string(), "async");
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::default()
            .with_port(8080)
            .with_engine(EngineKind::Threaded)
            .with_threads(0)
            .with_queue(4)
            .with_tls("c.pem", "k.pem")
            .with_keep_alive(Duration::from_secs(2));

        assert_eq!(config.port, 8080);
        assert_eq!(config.threads, 1);
        assert_eq!(config.queue, 4);
        assert_eq!(config.tls.unwrap().cert, PathBuf::from("c.pem"));
        assert_eq!(config.keep_alive, Duration::from_secs(2));
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bind_conflict_is_bind_error() {
        let first = bind_listener(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0).unwrap();
        let port = first.local_addr().unwrap().port();
        let err = bind_listener(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), port).unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[test]
    fn test_local_targets_for_unspecified() {
        let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 9000);
        let targets = local_targets(addr);
        assert_eq!(targets[0].to_string(), "127.0.0.1:9000");
    }
}

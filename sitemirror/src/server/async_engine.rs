//! Async engine: a small tokio runtime serving hyper connections.
//!
//! The service is an `axum` router whose fallback hands every request to
//! the shared [`RequestPipeline`] on the blocking pool, so filesystem work
//! and compression never stall the event loop. File bodies are streamed in
//! chunks from `tokio::fs`.
//!
//! Plaintext listeners speak HTTP/1.1. With a certificate and key, TLS is
//! terminated with `tokio-rustls` and HTTP/2 is offered through ALPN.

use std::io::{self, SeekFrom};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use http::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, trace, warn};

use super::engine::{bind_listener, ServerConfig, ServerEngine};
use super::error::{ServerError, ServerResult};
use super::pipeline::{RequestPipeline, ResponseBody, SiteRequest, SiteResponse};
use super::tls::load_server_config;

const ENGINE_NAME: &str = "async";

/// Chunk size for streamed file bodies.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Time allowed for a TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for open connections to finish after shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

struct Running {
    addr: SocketAddr,
    runtime: Runtime,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// Tokio + hyper engine.
pub struct AsyncEngine {
    config: ServerConfig,
    pipeline: Arc<RequestPipeline>,
    running: Option<Running>,
}

impl AsyncEngine {
    pub fn new(config: ServerConfig, pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            config,
            pipeline,
            running: None,
        }
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }
}

impl ServerEngine for AsyncEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.running.is_some() {
            return Err(ServerError::State {
                engine: ENGINE_NAME,
                state: "already running",
            });
        }

        let tls = match &self.config.tls {
            Some(paths) => Some(TlsAcceptor::from(load_server_config(&paths.cert, &paths.key)?)),
            None => None,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.runtime_threads)
            .thread_name("sitemirror-async")
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        let std_listener = bind_listener(self.config.bind, self.config.port)?;
        std_listener.set_nonblocking(true)?;
        let addr = std_listener.local_addr()?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)?
        };

        let app = Router::new()
            .fallback(serve_site)
            .with_state(Arc::clone(&self.pipeline));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let secure = tls.is_some();
        let accept_task = runtime.spawn(accept_loop(
            listener,
            app,
            tls,
            self.config.keep_alive,
            shutdown_rx,
        ));

        info!(
            addr = %addr,
            runtime_threads = self.config.runtime_threads,
            tls = secure,
            "Async engine listening"
        );
        self.running = Some(Running {
            addr,
            runtime,
            shutdown,
            accept_task,
        });
        Ok(addr)
    }

    fn route_request(&self, request: &SiteRequest) -> SiteResponse {
        self.pipeline.handle(request)
    }

    fn shutdown(&mut self) -> ServerResult<()> {
        let Some(Running {
            addr,
            runtime,
            shutdown,
            accept_task,
        }) = self.running.take()
        else {
            return Ok(());
        };

        let _ = shutdown.send(true);
        let drained = runtime.block_on(async { tokio::time::timeout(DRAIN_TIMEOUT, accept_task).await });
        match drained {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Accept task failed"),
            Err(_) => warn!("Timed out waiting for connections to drain"),
        }
        runtime.shutdown_timeout(Duration::from_secs(1));
        info!(addr = %addr, "Async engine stopped");
        Ok(())
    }
}

impl Drop for AsyncEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    app: Router,
    tls: Option<TlsAcceptor>,
    keep_alive: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!(error = %e, "Accept failed");
                        continue;
                    }
                };
                let service = TowerToHyperService::new(app.clone());
                let shutdown = shutdown.clone();
                match &tls {
                    Some(acceptor) => {
                        let acceptor = acceptor.clone();
                        connections.spawn(serve_tls(stream, peer, acceptor, service, keep_alive, shutdown));
                    }
                    None => {
                        connections.spawn(serve_plain(stream, peer, service, keep_alive, shutdown));
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    drop(listener);
    debug!(open = connections.len(), "Draining connections");
    while connections.join_next().await.is_some() {}
}

async fn serve_plain(
    stream: TcpStream,
    peer: SocketAddr,
    service: TowerToHyperService<Router>,
    keep_alive: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let mut builder = hyper::server::conn::http1::Builder::new();
    builder.timer(TokioTimer::new()).header_read_timeout(keep_alive);
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    trace!(peer = %peer, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = shutdown.changed(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn serve_tls(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    service: TowerToHyperService<Router>,
    keep_alive: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "TLS handshake timed out");
            return;
        }
    };

    // ALPN picks h2 or http/1.1; the auto builder follows the preface
    let mut builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(keep_alive);
    builder.http2().timer(TokioTimer::new());
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    trace!(peer = %peer, error = %e, "TLS connection ended with error");
                }
                break;
            }
            _ = shutdown.changed(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Router fallback: every request goes through the pipeline.
async fn serve_site(State(pipeline): State<Arc<RequestPipeline>>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let site_request = SiteRequest {
        method: parts.method,
        target,
        headers: parts.headers,
    };

    let handled = tokio::task::spawn_blocking(move || pipeline.handle(&site_request)).await;
    let site_response = match handled {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Request handler panicked");
            return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    into_response(site_response).await
}

async fn into_response(site: SiteResponse) -> Response {
    let body = match site.body {
        ResponseBody::Empty => Body::empty(),
        ResponseBody::Bytes(bytes) => Body::from(bytes),
        ResponseBody::File { path, offset, len } => match file_body(&path, offset, len).await {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "File vanished before sending");
                return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        },
    };
    let mut response = Response::new(body);
    *response.status_mut() = site.status;
    *response.headers_mut() = site.headers;
    response
}

async fn file_body(path: &Path, offset: u64, len: u64) -> io::Result<Body> {
    let mut file = tokio::fs::File::open(path).await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    let stream = ReaderStream::with_capacity(file.take(len), STREAM_CHUNK_BYTES);
    Ok(Body::from_stream(stream))
}

fn plain_status(status: StatusCode) -> Response {
    let text = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response
}

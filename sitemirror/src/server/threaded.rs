//! Blocking engine: one acceptor thread feeding a fixed pool of workers.
//!
//! Accepted connections go through a bounded channel. When every worker is
//! busy and the queue is full, the acceptor answers `503` itself and closes
//! the connection, so a burst never grows memory without bound. Each worker
//! owns one connection at a time and serves its requests in order
//! (HTTP/1.1 keep-alive, pipelined requests answered sequentially).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::engine::{bind_listener, local_targets, ServerConfig, ServerEngine};
use super::error::{ServerError, ServerResult};
use super::pipeline::{RequestPipeline, ResponseBody, SiteRequest, SiteResponse};
use crate::http_date;

/// Largest accepted request head (request line plus headers).
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Largest request body drained from a GET/HEAD before answering.
const MAX_DRAIN_BYTES: u64 = 64 * 1024;

/// Maximum number of request headers.
const MAX_HEADERS: usize = 64;

/// Socket read timeout; idle connections are re-checked at this interval.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Write timeout for responses.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

const ENGINE_NAME: &str = "threaded";

struct Running {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    acceptor: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Threaded engine built on `std::net`.
pub struct ThreadedEngine {
    config: ServerConfig,
    pipeline: Arc<RequestPipeline>,
    running: Option<Running>,
}

impl ThreadedEngine {
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

impl ServerEngine for ThreadedEngine {
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
        if self.config.tls.is_some() {
            warn!("TLS is only served by the async engine; threaded engine serves plaintext");
        }

        let listener = bind_listener(self.config.bind, self.config.port)?;
        let addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::sync_channel::<TcpStream>(self.config.queue);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(self.config.threads);
        for id in 0..self.config.threads {
            let receiver = Arc::clone(&receiver);
            let pipeline = Arc::clone(&self.pipeline);
            let stop = Arc::clone(&stop);
            let keep_alive = self.config.keep_alive;
            let handle = thread::Builder::new()
                .name(format!("sitemirror-worker-{}", id))
                .spawn(move || worker_loop(&receiver, &pipeline, &stop, keep_alive))
                .map_err(ServerError::Runtime)?;
            workers.push(handle);
        }

        let acceptor_stop = Arc::clone(&stop);
        let acceptor = thread::Builder::new()
            .name("sitemirror-acceptor".to_string())
            .spawn(move || accept_loop(listener, sender, &acceptor_stop))
            .map_err(ServerError::Runtime)?;

        info!(
            addr = %addr,
            threads = self.config.threads,
            queue = self.config.queue,
            "Threaded engine listening"
        );
        self.running = Some(Running {
            addr,
            stop,
            acceptor,
            workers,
        });
        Ok(addr)
    }

    fn route_request(&self, request: &SiteRequest) -> SiteResponse {
        self.pipeline.handle(request)
    }

    fn shutdown(&mut self) -> ServerResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.stop.store(true, Ordering::SeqCst);

        // Wake the blocking accept
        for target in local_targets(running.addr) {
            if TcpStream::connect_timeout(&target, Duration::from_secs(1)).is_ok() {
                break;
            }
        }

        if running.acceptor.join().is_err() {
            warn!("Acceptor thread panicked");
        }
        for worker in running.workers {
            if worker.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
        info!(addr = %running.addr, "Threaded engine stopped");
        Ok(())
    }
}

impl Drop for ThreadedEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, sender: SyncSender<TcpStream>, stop: &AtomicBool) {
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "Accept failed");
                continue;
            }
        };
        match sender.try_send(stream) {
            Ok(()) => {}
            Err(TrySendError::Full(stream)) => reject_busy(stream),
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    // Dropping the sender lets workers drain the queue and exit
}

fn reject_busy(mut stream: TcpStream) {
    let body = "Service Unavailable";
    let head = format!(
        "HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\nRetry-After: 1\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
    if let Err(e) = stream.write_all(head.as_bytes()) {
        trace!(error = %e, "Failed to send busy response");
    }
    let _ = stream.shutdown(Shutdown::Write);
    debug!("Queue full, rejected connection with 503");
}

fn worker_loop(
    receiver: &Mutex<Receiver<TcpStream>>,
    pipeline: &RequestPipeline,
    stop: &AtomicBool,
    keep_alive: Duration,
) {
    loop {
        let next = receiver.lock().recv();
        let Ok(stream) = next else {
            break;
        };
        let peer = stream.peer_addr().ok();
        if let Err(e) = serve_connection(stream, pipeline, stop, keep_alive) {
            trace!(peer = ?peer, error = %e, "Connection ended with error");
        }
    }
}

/// A request head parsed out of the connection buffer.
struct ParsedHead {
    request: SiteRequest,
    head_len: usize,
    body_len: u64,
    keep_alive: bool,
    http10: bool,
}

enum ParseOutcome {
    Complete(ParsedHead),
    Partial,
    Invalid,
    Unsupported,
}

fn serve_connection(
    mut stream: TcpStream,
    pipeline: &RequestPipeline,
    stop: &AtomicBool,
    keep_alive: Duration,
) -> io::Result<()> {
    stream.set_read_timeout(Some(POLL_INTERVAL.min(keep_alive.max(Duration::from_millis(1)))))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    let _ = stream.set_nodelay(true);

    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 8192];
    let mut idle = Duration::ZERO;

    loop {
        match parse_head(&buffer) {
            ParseOutcome::Complete(head) => {
                if head.body_len > MAX_DRAIN_BYTES {
                    return write_plain(&mut stream, StatusCode::PAYLOAD_TOO_LARGE);
                }
                let total = head.head_len + head.body_len as usize;
                if buffer.len() < total {
                    // Wait for the rest of the (ignored) request body
                    if !read_more(&mut stream, &mut buffer, &mut chunk, &mut idle, stop, keep_alive)? {
                        return Ok(());
                    }
                    continue;
                }
                buffer.drain(..total);

                let close = !head.keep_alive || stop.load(Ordering::SeqCst);
                let response = pipeline.handle(&head.request);
                write_response(&mut stream, &response, close, head.http10)?;
                if close {
                    let _ = stream.shutdown(Shutdown::Write);
                    return Ok(());
                }
                idle = Duration::ZERO;
                continue;
            }
            ParseOutcome::Partial => {
                if buffer.len() > MAX_HEAD_BYTES {
                    return write_plain(&mut stream, StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
                }
            }
            ParseOutcome::Invalid => return write_plain(&mut stream, StatusCode::BAD_REQUEST),
            ParseOutcome::Unsupported => return write_plain(&mut stream, StatusCode::NOT_IMPLEMENTED),
        }

        if !read_more(&mut stream, &mut buffer, &mut chunk, &mut idle, stop, keep_alive)? {
            return Ok(());
        }
    }
}

/// Read into `buffer`. Returns false when the connection should close
/// (peer closed, idle too long, or the engine is stopping while idle).
fn read_more(
    stream: &mut TcpStream,
    buffer: &mut Vec<u8>,
    chunk: &mut [u8],
    idle: &mut Duration,
    stop: &AtomicBool,
    keep_alive: Duration,
) -> io::Result<bool> {
    loop {
        match stream.read(chunk) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                *idle = Duration::ZERO;
                return Ok(true);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                *idle += POLL_INTERVAL;
                if (buffer.is_empty() && stop.load(Ordering::SeqCst)) || *idle >= keep_alive {
                    return Ok(false);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn parse_head(buffer: &[u8]) -> ParseOutcome {
    if buffer.is_empty() {
        return ParseOutcome::Partial;
    }
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let head_len = match parsed.parse(buffer) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return ParseOutcome::Partial,
        Err(_) => return ParseOutcome::Invalid,
    };

    let (Some(method), Some(target)) = (parsed.method, parsed.path) else {
        return ParseOutcome::Invalid;
    };
    let Ok(method) = Method::from_bytes(method.as_bytes()) else {
        return ParseOutcome::Invalid;
    };
    let http10 = parsed.version == Some(0);

    let mut map = HeaderMap::new();
    for header in parsed.headers.iter() {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(header.name.as_bytes()),
            HeaderValue::from_bytes(header.value),
        ) else {
            return ParseOutcome::Invalid;
        };
        map.append(name, value);
    }

    if map.contains_key(TRANSFER_ENCODING) {
        return ParseOutcome::Unsupported;
    }
    let body_len = match map.get(CONTENT_LENGTH) {
        None => 0,
        Some(value) => match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(len) => len,
            None => return ParseOutcome::Invalid,
        },
    };

    let connection = map
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let keep_alive = if http10 {
        connection.contains("keep-alive")
    } else {
        !connection.contains("close")
    };

    ParseOutcome::Complete(ParsedHead {
        request: SiteRequest {
            method,
            target: target.to_string(),
            headers: map,
        },
        head_len,
        body_len,
        keep_alive,
        http10,
    })
}

fn write_response(
    stream: &mut TcpStream,
    response: &SiteResponse,
    close: bool,
    http10: bool,
) -> io::Result<()> {
    // Open the file before committing to a status line
    let file = match &response.body {
        ResponseBody::File { path, offset, len } => match open_range(path, *offset) {
            Ok(file) => Some((file, *len)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "File vanished before sending");
                return write_plain(stream, StatusCode::INTERNAL_SERVER_ERROR);
            }
        },
        _ => None,
    };

    let mut head = Vec::with_capacity(512);
    write_status_line(&mut head, response.status);
    for (name, value) in response.headers.iter() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(format!("Date: {}\r\n", http_date::format(SystemTime::now())).as_bytes());
    if close {
        head.extend_from_slice(b"Connection: close\r\n");
    } else if http10 {
        head.extend_from_slice(b"Connection: keep-alive\r\n");
    }
    head.extend_from_slice(b"\r\n");
    stream.write_all(&head)?;

    match (&response.body, file) {
        (ResponseBody::Bytes(bytes), _) => stream.write_all(bytes)?,
        (ResponseBody::File { .. }, Some((file, len))) => {
            let copied = io::copy(&mut file.take(len), stream)?;
            if copied != len {
                // Declared length can no longer be honoured
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while sending"));
            }
        }
        _ => {}
    }
    stream.flush()
}

fn open_range(path: &std::path::Path, offset: u64) -> io::Result<File> {
    let mut file = File::open(path)?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))?;
    }
    Ok(file)
}

fn write_status_line(out: &mut Vec<u8>, status: StatusCode) {
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
}

/// Engine-level error response that always closes the connection.
fn write_plain(stream: &mut TcpStream, status: StatusCode) -> io::Result<()> {
    let text = status.canonical_reason().unwrap_or("Error");
    let mut out = Vec::with_capacity(160);
    write_status_line(&mut out, status);
    out.extend_from_slice(
        format!(
            "Content-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            text.len(),
            text
        )
        .as_bytes(),
    );
    stream.write_all(&out)?;
    let _ = stream.shutdown(Shutdown::Write);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_policy::PathPolicy;
    use crate::server::cache::{CacheConfig, CacheLayer};
    use crate::server::cache_control::CacheControlPolicy;
    use std::io::BufRead;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    fn engine(dir: &TempDir, threads: usize, queue: usize) -> ThreadedEngine {
        let policy = PathPolicy::new(dir.path(), "http://origin.test");
        let pipeline = RequestPipeline::new(
            policy,
            Arc::new(CacheLayer::new(CacheConfig::default())),
            CacheControlPolicy::default(),
        );
        let config = ServerConfig::default()
            .with_bind(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
            .with_threads(threads)
            .with_queue(queue)
            .with_keep_alive(Duration::from_secs(1));
        ThreadedEngine::new(config, Arc::new(pipeline))
    }

    fn read_response(reader: &mut io::BufReader<TcpStream>) -> (String, Vec<(String, String)>, Vec<u8>) {
        let mut status = String::new();
        reader.read_line(&mut status).unwrap();
        let mut headers = Vec::new();
        let mut length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(": ").unwrap();
            if name.eq_ignore_ascii_case("content-length") {
                length = value.parse().unwrap();
            }
            headers.push((name.to_ascii_lowercase(), value.to_string()));
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).unwrap();
        (status.trim_end().to_string(), headers, body)
    }

    #[test]
    fn test_parse_head_complete() {
        let raw = b"GET /a.txt HTTP/1.1\r\nHost: x\r\nAccept-Encoding: gzip\r\n\r\nGET /b";
        let ParseOutcome::Complete(head) = parse_head(raw) else {
            panic!("expected complete head");
        };
        assert_eq!(head.request.method, Method::GET);
        assert_eq!(head.request.target, "/a.txt");
        assert!(head.keep_alive);
        assert_eq!(&raw[head.head_len..], b"GET /b");
    }

    #[test]
    fn test_parse_head_connection_semantics() {
        let ParseOutcome::Complete(head) = parse_head(b"GET / HTTP/1.0\r\n\r\n") else {
            panic!();
        };
        assert!(!head.keep_alive);
        assert!(head.http10);

        let ParseOutcome::Complete(head) = parse_head(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n") else {
            panic!();
        };
        assert!(!head.keep_alive);
    }

    #[test]
    fn test_parse_head_partial_and_invalid() {
        assert!(matches!(parse_head(b"GET / HTTP/1.1\r\nHost"), ParseOutcome::Partial));
        assert!(matches!(parse_head(b"\x01\x02 nonsense\r\n\r\n"), ParseOutcome::Invalid));
        assert!(matches!(
            parse_head(b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"),
            ParseOutcome::Unsupported
        ));
    }

    #[test]
    fn test_serves_pipelined_requests_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "first").unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        let mut engine = engine(&dir, 2, 4);
        let addr = engine.start().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\nGET /b.txt HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let mut reader = io::BufReader::new(stream);
        let (status_a, headers_a, body_a) = read_response(&mut reader);
        let (status_b, _, body_b) = read_response(&mut reader);

        assert_eq!(status_a, "HTTP/1.1 200 OK");
        assert_eq!(body_a, b"first");
        assert!(headers_a.iter().any(|(n, _)| n == "date"));
        assert_eq!(status_b, "HTTP/1.1 200 OK");
        assert_eq!(body_b, b"second");
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_oversized_head_gets_431() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, 1, 1);
        let addr = engine.start().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        let mut request = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        request.extend(std::iter::repeat(b'a').take(MAX_HEAD_BYTES + 10));
        stream.write_all(&request).unwrap();
        let mut reader = io::BufReader::new(stream);
        let (status, _, _) = read_response(&mut reader);
        assert_eq!(status, "HTTP/1.1 431 Request Header Fields Too Large");
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_start_twice_is_state_error() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, 1, 1);
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(ServerError::State { .. })));
        engine.shutdown().unwrap();
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_full_queue_gets_503() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let mut engine = engine(&dir, 1, 1);
        let addr = engine.start().unwrap();

        // One connection occupies the only worker, one fills the queue
        let busy = TcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let queued = TcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let rejected = TcpStream::connect(addr).unwrap();
        let mut reader = io::BufReader::new(rejected);
        let (status, headers, _) = read_response(&mut reader);
        assert_eq!(status, "HTTP/1.1 503 Service Unavailable");
        assert!(headers.iter().any(|(n, v)| n == "connection" && v == "close"));

        drop(busy);
        drop(queued);
        engine.shutdown().unwrap();
    }
}

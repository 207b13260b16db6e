//! `sitemirror serve`

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Args;
use sitemirror::config::ConfigFile;
use sitemirror::path_policy::PathPolicy;
use sitemirror::server::{build_engine, CacheLayer, EngineKind, RequestPipeline};
use tracing::info;

use crate::error::CliError;
use crate::runner::{banner, CliRunner};

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// TLS certificate chain (PEM); enables HTTPS and HTTP/2
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// Server engine: threaded or async
    #[arg(long)]
    pub engine: Option<EngineKind>,

    /// Listen address (dual-stack wildcard by default)
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Mirror root directory
    #[arg(long)]
    pub root: Option<PathBuf>,
}

impl ServeArgs {
    /// CLI flags take precedence over the config file.
    fn apply(&self, config: &mut ConfigFile) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            config.server.cert = Some(cert.clone());
            config.server.key = Some(key.clone());
        }
        if let Some(engine) = self.engine {
            config.server.engine = engine;
        }
        if let Some(bind) = self.bind {
            config.server.bind = Some(bind);
        }
        if let Some(root) = &self.root {
            config.mirror.root = root.clone();
        }
    }
}

pub fn run(runner: &CliRunner, args: ServeArgs) -> Result<(), CliError> {
    let text = runner.text();
    let mut config = runner.config().clone();
    args.apply(&mut config);

    let root = config.mirror.root.clone();
    if !root.is_dir() {
        return Err(CliError::Config(text.missing_root(&root.display().to_string())));
    }

    let policy = PathPolicy::new(&root, config.mirror.base_url.clone().unwrap_or_default());
    let cache = Arc::new(CacheLayer::new(config.cache_config()));
    let pipeline = RequestPipeline::new(policy, cache, config.cache_control_policy()?);

    let server_config = config.server_config();
    let tls = server_config.tls.is_some();
    let engine_kind = server_config.engine;
    let mut server = build_engine(server_config, Arc::new(pipeline));
    let addr = server.start().map_err(CliError::Serve)?;

    banner(text.serve_title());
    println!("{}", text.engine(server.name()));
    println!("{}", text.protocol(protocol(engine_kind, tls)));
    println!("{}", text.address(&display_url(addr, tls)));
    if tls && engine_kind == EngineKind::Threaded {
        println!("{}", text.tls_threaded_hint());
    }
    println!("{}", text.press_ctrl_c());
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_running.store(false, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("Shutting down server");
    server.shutdown().map_err(CliError::Serve)?;
    println!("{}", text.server_stopped());
    Ok(())
}

fn protocol(engine: EngineKind, tls: bool) -> &'static str {
    match (engine, tls) {
        (EngineKind::Async, true) => "HTTPS (h2, http/1.1)",
        _ => "HTTP/1.1",
    }
}

/// URL a local browser can open.
fn display_url(addr: SocketAddr, tls: bool) -> String {
    let scheme = if tls { "https" } else { "http" };
    if addr.ip().is_unspecified() {
        format!("{}://localhost:{}", scheme, addr.port())
    } else {
        format!("{}://{}", scheme, addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_display_url() {
        let wildcard = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 9000);
        assert_eq!(display_url(wildcard, false), "http://localhost:9000");

        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8443);
        assert_eq!(display_url(local, true), "https://127.0.0.1:8443");

        let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 80);
        assert_eq!(display_url(v6, false), "http://[::1]:80");
    }

    #[test]
    fn test_protocol_label() {
        assert_eq!(protocol(EngineKind::Async, true), "HTTPS (h2, http/1.1)");
        assert_eq!(protocol(EngineKind::Async, false), "HTTP/1.1");
        assert_eq!(protocol(EngineKind::Threaded, true), "HTTP/1.1");
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = ConfigFile::default();
        let args = ServeArgs {
            port: Some(8080),
            cert: Some(PathBuf::from("c.pem")),
            key: Some(PathBuf::from("k.pem")),
            engine: Some(EngineKind::Threaded),
            bind: None,
            root: None,
        };

        args.apply(&mut config);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.engine, EngineKind::Threaded);
        assert!(config.server_config().tls.is_some());
    }
}

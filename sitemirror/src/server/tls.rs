//! TLS configuration for the async engine.
//!
//! The server only loads the PEM files it is given; it never generates
//! certificates.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsConfig;

use super::error::{ServerError, ServerResult};

/// ALPN protocols offered to clients, most preferred first.
pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Build a rustls server config from a PEM certificate chain and key.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> ServerResult<Arc<RustlsConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let mut config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(cert_path, e.to_string()))?;
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> ServerResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(path, format!("read certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(tls_error(path, "no certificates found".to_string()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> ServerResult<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_error(path, format!("read private key: {}", e)))?
        .ok_or_else(|| tls_error(path, "no private key found".to_string()))
}

fn open(path: &Path) -> ServerResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| tls_error(path, e.to_string()))
}

fn tls_error(path: &Path, reason: String) -> ServerError {
    ServerError::Tls {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_are_tls_errors() {
        let dir = TempDir::new().unwrap();
        let err = load_server_config(&dir.path().join("cert.pem"), &dir.path().join("key.pem"))
            .unwrap_err();
        assert!(matches!(err, ServerError::Tls { .. }));
    }

    #[test]
    fn test_empty_certificate_file_rejected() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, "not a pem file\n").unwrap();
        fs::write(&key, "").unwrap();

        match load_server_config(&cert, &key) {
            Err(ServerError::Tls { path, reason }) => {
                assert_eq!(path, cert);
                assert!(reason.contains("no certificates"));
            }
            other => panic!("expected TLS error, got {:?}", other.map(|_| ())),
        }
    }
}

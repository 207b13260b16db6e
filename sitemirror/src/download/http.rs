//! reqwest-backed fetcher for origin requests.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, REFERER, RETRY_AFTER};
use tracing::trace;

use super::error::{DownloadError, DownloadResult, FetchError};
use super::fetcher::{FetchResponse, Fetcher};
use crate::http_date;

/// Default total timeout for one request in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default User-Agent sent to the origin.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; SiteMirror/0.1)";

/// Settings for the HTTP client.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Total time allowed for one request, body included.
    pub timeout: Duration,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
    /// Optional Referer header value.
    pub referer: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
        }
    }
}

impl FetcherConfig {
    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the Referer.
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// Blocking HTTP fetcher shared by all workers.
///
/// `reqwest::blocking::Client` pools connections internally, so one instance
/// serves the whole pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher from its settings.
    pub fn new(config: &FetcherConfig) -> DownloadResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(referer) = &config.referer {
            let value = referer
                .parse()
                .map_err(|_| DownloadError::Client(format!("invalid referer {:?}", referer)))?;
            headers.insert(REFERER, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| DownloadError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url).send().map_err(|e| self.classify(e))?;

        let status = response.status();
        trace!(url, status = status.as_u16(), "Origin responded");
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                retry_after: parse_retry_after(response.headers()),
            });
        }

        Ok(FetchResponse {
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// Read a `Retry-After` header given as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = http_date::parse(value)?;
    Some(
        at.duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetcherConfig::default().with_timeout(Duration::from_secs(5))).unwrap()
    }

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::default()
            .with_timeout(Duration::from_secs(60))
            .with_connect_timeout(Duration::from_secs(3))
            .with_user_agent("test-agent")
            .with_referer("https://example.org/");

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.user_agent, "test-agent");
        assert_eq!(config.referer.as_deref(), Some("https://example.org/"));
    }

    #[test]
    fn test_get_success_streams_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/a.txt")
            .with_status(200)
            .with_body("hello")
            .create();

        let mut response = fetcher().get(&format!("{}/a.txt", server.url())).unwrap();
        let mut body = String::new();
        response.body.read_to_string(&mut body).unwrap();

        assert_eq!(body, "hello");
        assert_eq!(response.content_length, Some(5));
        mock.assert();
    }

    #[test]
    fn test_get_sends_referer() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/a.txt")
            .match_header("referer", "https://origin.example/")
            .with_body("x")
            .create();

        let fetcher =
            HttpFetcher::new(&FetcherConfig::default().with_referer("https://origin.example/"))
                .unwrap();
        fetcher.get(&format!("{}/a.txt", server.url())).unwrap();
        mock.assert();
    }

    #[test]
    fn test_get_not_found_is_permanent() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/gone").with_status(404).create();

        let err = fetcher()
            .get(&format!("{}/gone", server.url()))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.kind(), super::super::FetchErrorKind::Permanent);
    }

    #[test]
    fn test_get_server_error_is_transient() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/flaky").with_status(503).create();

        let err = fetcher()
            .get(&format!("{}/flaky", server.url()))
            .unwrap_err();
        assert_eq!(err.kind(), super::super::FetchErrorKind::Transient);
    }

    #[test]
    fn test_get_rate_limited_reports_retry_after() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/busy")
            .with_status(429)
            .with_header("retry-after", "7")
            .create();

        let err = fetcher()
            .get(&format!("{}/busy", server.url()))
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_connection_refused_is_network_error() {
        // Port 9 (discard) on loopback is almost never listening
        let err = fetcher().get("http://127.0.0.1:9/nothing").unwrap_err();
        assert!(matches!(
            err,
            FetchError::Network(_) | FetchError::Timeout { .. }
        ));
    }

    #[test]
    fn test_parse_retry_after_http_date_in_past() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "Sun, 06 Nov 1994 08:49:37 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }
}

//! INI configuration file.
//!
//! The file lives at `<config dir>/sitemirror/config.ini` unless a path is
//! given explicitly. A missing file is not an error; every setting has a
//! default and command-line flags override what the file says.
//!
//! ```ini
//! [mirror]
//! root = ./mirror
//! manifest = manifest.txt
//! base_url = https://example.org
//!
//! [download]
//! workers = 10
//! retries = 3
//!
//! [server]
//! port = 9000
//! engine = async
//!
//! [cache_control]
//! *.html = no-cache
//! ```

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::download::{
    FetcherConfig, PoolConfig, RetryPolicy, SessionConfig, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS, DEFAULT_PROGRESS_INTERVAL_SECS,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, DEFAULT_WORKERS,
};
use crate::server::{
    CacheConfig, CacheControlPolicy, CacheRule, EngineKind, ServerConfig, DEFAULT_KEEP_ALIVE_SECS,
    DEFAULT_MAX_BYTES, DEFAULT_MAX_COMPRESS_BYTES, DEFAULT_MIN_COMPRESS_BYTES, DEFAULT_PORT,
    DEFAULT_QUEUE, DEFAULT_RUNTIME_THREADS, DEFAULT_THREADS,
};

/// Config file name inside the application config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Default retry budget for transient download failures.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default log level when neither the file nor `RUST_LOG` sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors from reading or interpreting the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value '{value}' for [{section}] {key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// `[mirror]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorSettings {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub base_url: Option<String>,
    /// Directory for `download_journal.json` and `download_failures.txt`.
    pub journal: PathBuf,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("mirror"),
            manifest: PathBuf::from("manifest.txt"),
            base_url: None,
            journal: PathBuf::from("."),
        }
    }
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSettings {
    pub workers: usize,
    pub retries: u32,
    pub timeout: u64,
    pub connect_timeout: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub user_agent: String,
    pub referer: Option<String>,
    pub progress_interval_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            initial_backoff_ms: DEFAULT_INITIAL_DELAY_MS,
            max_backoff_secs: DEFAULT_MAX_DELAY_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub port: u16,
    pub bind: Option<IpAddr>,
    pub engine: EngineKind,
    pub threads: usize,
    pub queue: usize,
    pub runtime_threads: usize,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub keep_alive_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: None,
            engine: EngineKind::default(),
            threads: DEFAULT_THREADS,
            queue: DEFAULT_QUEUE,
            runtime_threads: DEFAULT_RUNTIME_THREADS,
            cert: None,
            key: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_bytes: u64,
    pub min_compress_bytes: u64,
    pub max_compress_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            min_compress_bytes: DEFAULT_MIN_COMPRESS_BYTES,
            max_compress_bytes: DEFAULT_MAX_COMPRESS_BYTES,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    /// Directory for daily rolling log files; stderr only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub mirror: MirrorSettings,
    pub download: DownloadSettings,
    pub server: ServerSettings,
    pub cache: CacheSettings,
    /// Ordered `glob = directive` pairs checked before the built-in rules.
    pub cache_control: Vec<(String, String)>,
    pub logging: LoggingSettings,
}

/// Default config file location.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sitemirror")
        .join(CONFIG_FILE_NAME)
}

impl ConfigFile {
    /// Load from the default location.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(e) => ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> ConfigResult<Self> {
        let mut config = Self::default();
        let reader = Reader { ini };

        let m = &mut config.mirror;
        reader.path("mirror", "root", &mut m.root);
        reader.path("mirror", "manifest", &mut m.manifest);
        m.base_url = reader.string("mirror", "base_url");
        reader.path("mirror", "journal", &mut m.journal);

        let d = &mut config.download;
        reader.parse("download", "workers", &mut d.workers)?;
        reader.parse("download", "retries", &mut d.retries)?;
        reader.parse("download", "timeout", &mut d.timeout)?;
        reader.parse("download", "connect_timeout", &mut d.connect_timeout)?;
        reader.parse("download", "initial_backoff_ms", &mut d.initial_backoff_ms)?;
        reader.parse("download", "max_backoff_secs", &mut d.max_backoff_secs)?;
        if let Some(agent) = reader.string("download", "user_agent") {
            d.user_agent = agent;
        }
        d.referer = reader.string("download", "referer");
        reader.parse("download", "progress_interval_secs", &mut d.progress_interval_secs)?;
        if d.workers == 0 {
            return Err(invalid("download", "workers", "0"));
        }

        let s = &mut config.server;
        reader.parse("server", "port", &mut s.port)?;
        s.bind = reader.parse_opt("server", "bind")?;
        if let Some(engine) = reader.string("server", "engine") {
            s.engine = engine
                .parse()
                .map_err(|_| invalid("server", "engine", &engine))?;
        }
        reader.parse("server", "threads", &mut s.threads)?;
        reader.parse("server", "queue", &mut s.queue)?;
        reader.parse("server", "runtime_threads", &mut s.runtime_threads)?;
        s.cert = reader.string("server", "cert").map(PathBuf::from);
        s.key = reader.string("server", "key").map(PathBuf::from);
        reader.parse("server", "keep_alive_secs", &mut s.keep_alive_secs)?;
        if s.cert.is_some() != s.key.is_some() {
            // TLS needs both halves
            let missing = if s.cert.is_some() { "key" } else { "cert" };
            return Err(invalid("server", missing, ""));
        }

        let c = &mut config.cache;
        reader.parse("cache", "max_bytes", &mut c.max_bytes)?;
        reader.parse("cache", "min_compress_bytes", &mut c.min_compress_bytes)?;
        reader.parse("cache", "max_compress_bytes", &mut c.max_compress_bytes)?;
        if c.min_compress_bytes > c.max_compress_bytes {
            return Err(invalid(
                "cache",
                "min_compress_bytes",
                &c.min_compress_bytes.to_string(),
            ));
        }

        if let Some(section) = ini.section(Some("cache_control")) {
            for (pattern, directive) in section.iter() {
                if CacheRule::new(pattern, directive).is_err() {
                    return Err(invalid("cache_control", pattern, directive));
                }
                config
                    .cache_control
                    .push((pattern.to_string(), directive.to_string()));
            }
        }

        if let Some(level) = reader.string("logging", "level") {
            config.logging.level = level;
        }
        config.logging.directory = reader.string("logging", "directory").map(PathBuf::from);

        Ok(config)
    }

    /// Retry policy from `[download]`.
    pub fn retry_policy(&self) -> RetryPolicy {
        let d = &self.download;
        if d.retries == 0 {
            return RetryPolicy::None;
        }
        RetryPolicy::ExponentialBackoff {
            max_retries: d.retries,
            initial_delay: Duration::from_millis(d.initial_backoff_ms),
            max_delay: Duration::from_secs(d.max_backoff_secs),
            multiplier: 2.0,
        }
    }

    /// HTTP client settings from `[download]`.
    pub fn fetcher_config(&self) -> FetcherConfig {
        let d = &self.download;
        let config = FetcherConfig::default()
            .with_timeout(Duration::from_secs(d.timeout))
            .with_connect_timeout(Duration::from_secs(d.connect_timeout))
            .with_user_agent(d.user_agent.clone());
        match &d.referer {
            Some(referer) => config.with_referer(referer.clone()),
            None => config,
        }
    }

    /// Download session settings. `base_url` must already be resolved.
    pub fn session_config(&self, base_url: impl Into<String>) -> SessionConfig {
        SessionConfig::new(&self.mirror.root, &self.mirror.manifest, base_url)
            .with_journal_dir(&self.mirror.journal)
            .with_fetcher(self.fetcher_config())
            .with_pool(
                PoolConfig::default()
                    .with_workers(self.download.workers)
                    .with_retry(self.retry_policy()),
            )
            .with_progress_interval(Duration::from_secs(self.download.progress_interval_secs))
    }

    /// Engine settings from `[server]`.
    pub fn server_config(&self) -> ServerConfig {
        let s = &self.server;
        let mut config = ServerConfig::default()
            .with_port(s.port)
            .with_engine(s.engine)
            .with_threads(s.threads)
            .with_queue(s.queue)
            .with_runtime_threads(s.runtime_threads)
            .with_keep_alive(Duration::from_secs(s.keep_alive_secs));
        if let Some(bind) = s.bind {
            config = config.with_bind(bind);
        }
        if let (Some(cert), Some(key)) = (&s.cert, &s.key) {
            config = config.with_tls(cert, key);
        }
        config
    }

    /// Compression cache settings from `[cache]`.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_max_bytes(self.cache.max_bytes)
            .with_compress_range(self.cache.min_compress_bytes, self.cache.max_compress_bytes)
    }

    /// `[cache_control]` rules followed by the built-in tiers.
    pub fn cache_control_policy(&self) -> ConfigResult<CacheControlPolicy> {
        let rules = self
            .cache_control
            .iter()
            .map(|(pattern, directive)| {
                CacheRule::new(pattern, directive.as_str())
                    .map_err(|_| invalid("cache_control", pattern, directive))
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(CacheControlPolicy::with_overrides(rules))
    }
}

fn invalid(section: &str, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Typed lookups over a loaded INI document. Empty values count as unset.
struct Reader<'a> {
    ini: &'a Ini,
}

impl Reader<'_> {
    fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .get_from(Some(section), key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn string(&self, section: &str, key: &str) -> Option<String> {
        self.raw(section, key).map(str::to_string)
    }

    fn path(&self, section: &str, key: &str, target: &mut PathBuf) {
        if let Some(value) = self.raw(section, key) {
            *target = PathBuf::from(value);
        }
    }

    fn parse<T: FromStr>(&self, section: &str, key: &str, target: &mut T) -> ConfigResult<()> {
        if let Some(value) = self.parse_opt(section, key)? {
            *target = value;
        }
        Ok(())
    }

    fn parse_opt<T: FromStr>(&self, section: &str, key: &str) -> ConfigResult<Option<T>> {
        match self.raw(section, key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| invalid(section, key, value)),
        }
    }
}

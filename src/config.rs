//! Configuration management for Gatekeeper.
//!
//! Settings are read from a YAML file and then overridden by environment
//! variables named `GATEKEEPER__<SECTION>__<KEY>`, e.g.
//! `GATEKEEPER__LIMITER__REQUESTS=50`. Anything left unset falls back to the
//! defaults below.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "GATEKEEPER";
/// File picked up from the working directory when no path is given.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server and admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request header carrying an explicit client identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Use the first `X-Forwarded-For` hop before the peer address
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Upper bound on one limiter store call, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Path prefixes that bypass admission control
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            identity_header: default_identity_header(),
            trust_forwarded_for: false,
            store_timeout_ms: default_store_timeout(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

impl ServerConfig {
    /// Store call timeout as a duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_identity_header() -> String {
    "X-User-ID".to_string()
}

fn default_store_timeout() -> u64 {
    250
}

fn default_exempt_paths() -> Vec<String> {
    vec!["/ping".to_string()]
}

/// Which counter store backend to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory; only meaningful for a single instance
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection establishment timeout in seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,

    /// Expired-key sweep interval for the memory backend, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_redis_url(),
            dial_timeout_secs: default_dial_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl StoreConfig {
    /// Dial timeout as a duration. Zero falls back to the default.
    pub fn dial_timeout(&self) -> Duration {
        match self.dial_timeout_secs {
            0 => Duration::from_secs(default_dial_timeout()),
            secs => Duration::from_secs(secs),
        }
    }

    /// Cleanup interval as a duration. Zero falls back to the default.
    pub fn cleanup_interval(&self) -> Duration {
        match self.cleanup_interval_secs {
            0 => Duration::from_secs(default_cleanup_interval()),
            secs => Duration::from_secs(secs),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_dial_timeout() -> u64 {
    5
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Rate limiter configuration.
///
/// `algorithm` stays a plain string here so an unknown name is reported by
/// the limiter factory as an unsupported algorithm rather than as a parse
/// failure of the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// One of `fixed_window`, `sliding_window`, `token_bucket`
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Requests admitted per window
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Token bucket capacity
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: u64,

    /// Token bucket refill rate in tokens per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            requests: default_requests(),
            window_ms: default_window_ms(),
            bucket_capacity: default_bucket_capacity(),
            refill_rate: default_refill_rate(),
        }
    }
}

fn default_algorithm() -> String {
    "fixed_window".to_string()
}

fn default_requests() -> u64 {
    100
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_bucket_capacity() -> u64 {
    100
}

fn default_refill_rate() -> u64 {
    10
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file with environment overrides.
    ///
    /// Without an explicit path, `./config.yaml` is used if it exists;
    /// otherwise only defaults and environment overrides apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration");
                builder = builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Yaml)
                        .required(true),
                );
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!(path = DEFAULT_CONFIG_FILE, "Loading configuration");
                builder = builder.add_source(
                    config::File::from(Path::new(DEFAULT_CONFIG_FILE))
                        .format(config::FileFormat::Yaml),
                );
            }
            None => info!("No configuration file found, using defaults"),
        }

        let config: GatekeeperConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, without environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Apply command-line overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(addr) = args.listen_addr {
            self.server.listen_addr = addr;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "gatekeeper",
    version,
    about = "Distributed admission control backed by a shared counter store"
)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "PATH", env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long, value_name = "ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// Override the log filter (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.server.identity_header, "X-User-ID");
        assert_eq!(config.server.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.limiter.algorithm, "fixed_window");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
  trust_forwarded_for: true
store:
  backend: memory
limiter:
  algorithm: token_bucket
  bucket_capacity: 5
  refill_rate: 1
logging:
  format: json
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.server.exempt_paths, vec!["/ping".to_string()]);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.url, default_redis_url());
        assert_eq!(config.limiter.algorithm, "token_bucket");
        assert_eq!(config.limiter.bucket_capacity, 5);
        assert_eq!(config.limiter.requests, default_requests());
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_algorithm_still_parses() {
        let yaml = "limiter:\n  algorithm: leaky_bucket\n";
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.algorithm, "leaky_bucket");
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = GatekeeperConfig::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[test]
    fn test_zero_timeouts_fall_back() {
        let store = StoreConfig {
            dial_timeout_secs: 0,
            cleanup_interval_secs: 0,
            ..StoreConfig::default()
        };
        assert_eq!(store.dial_timeout(), Duration::from_secs(5));
        assert_eq!(store.cleanup_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gatekeeper-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "limiter:\n  algorithm: sliding_window\n  requests: 7\n").unwrap();

        let config = GatekeeperConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limiter.algorithm, "sliding_window");
        assert_eq!(config.limiter.requests, 7);

        let config = GatekeeperConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.limiter.requests, 7);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_args_override() {
        let args = Args::parse_from([
            "gatekeeper",
            "--listen-addr",
            "127.0.0.1:9999",
            "--log-level",
            "debug",
        ]);
        let mut config = GatekeeperConfig::default();
        config.apply_args(&args);

        assert_eq!(config.server.listen_addr.port(), 9999);
        assert_eq!(config.logging.level, "debug");
    }
}

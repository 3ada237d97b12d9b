//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Host configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Host binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS (comma-separated)
    pub client_origin: String,

    /// Base URL of the external energy source
    pub energy_source_url: String,
    /// Directory backing the local key-value store
    pub storage_dir: PathBuf,

    /// Remote state poll interval
    pub poll_interval: Duration,
    /// Upper bound on any single energy-source request
    pub request_timeout: Duration,
    /// Minimum gap between two accepted inputs from the same player
    pub debounce: Duration,
    /// Delay before a finished match restarts on its own (None = never)
    pub auto_restart_delay: Option<Duration>,
    /// Interval between reconnection probes while offline
    pub reconnect_interval: Duration,
    /// Consecutive connectivity failures before auto-reconnect gives up
    pub max_reconnect_attempts: u32,
    /// Optional match time limit; highest score wins when it elapses
    pub match_time_limit: Option<Duration>,
    /// Forward keyboard pedals to the energy source while online
    pub remote_pedal: bool,
    /// Start a waiting match when the energy source reports an active game
    pub remote_auto_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            client_origin: "http://localhost:8000".to_string(),
            energy_source_url: "http://127.0.0.1:8000".to_string(),
            storage_dir: PathBuf::from("data"),
            poll_interval: Duration::from_millis(50),
            request_timeout: Duration::from_millis(2_000),
            debounce: Duration::from_millis(50),
            auto_restart_delay: Some(Duration::from_secs(10)),
            reconnect_interval: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            match_time_limit: None,
            remote_pedal: false,
            remote_auto_start: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let poll_interval_ms: u64 = parse_var("POLL_INTERVAL_MS", 50)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("POLL_INTERVAL_MS"));
        }
        let reconnect_secs: u64 = parse_var("RECONNECT_INTERVAL_SECS", 10)?;
        if reconnect_secs == 0 {
            return Err(ConfigError::Invalid("RECONNECT_INTERVAL_SECS"));
        }
        let auto_restart_secs: u64 = parse_var("AUTO_RESTART_SECS", 10)?;
        let time_limit_secs: u64 = parse_var("MATCH_TIME_LIMIT_SECS", 0)?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),

            energy_source_url: env::var("ENERGY_SOURCE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.energy_source_url),
            storage_dir: env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),

            poll_interval: Duration::from_millis(poll_interval_ms),
            request_timeout: Duration::from_millis(parse_var("REQUEST_TIMEOUT_MS", 2_000)?),
            debounce: Duration::from_millis(parse_var("DEBOUNCE_MS", 50)?),
            auto_restart_delay: (auto_restart_secs > 0)
                .then(|| Duration::from_secs(auto_restart_secs)),
            reconnect_interval: Duration::from_secs(reconnect_secs),
            max_reconnect_attempts: parse_var("MAX_RECONNECT_ATTEMPTS", 5)?,
            match_time_limit: (time_limit_secs > 0).then(|| Duration::from_secs(time_limit_secs)),
            remote_pedal: parse_var("REMOTE_PEDAL", false)?,
            remote_auto_start: parse_var("REMOTE_AUTO_START", true)?,
        })
    }
}

/// Parse an optional environment variable, using `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

//! Configuration types for ya-proxy
//!
//! Configuration is loaded from JSON. Every section and field has a default,
//! so an empty object (or no file at all) yields a runnable proxy.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Address the proxy listens on when nothing else is configured
pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8081));

/// Largest accepted connect timeout
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 60_000;

/// Smallest accepted copy buffer
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Largest accepted copy buffer
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listening socket
    #[serde(default)]
    pub listen: ListenConfig,

    /// Upstream dial and transport settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Single-instance PID file
    #[serde(default)]
    pub pid_file: PidFileConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.connection.validate()?;
        self.log.validate()?;
        self.pid_file.validate()?;
        Ok(())
    }

    /// Create the default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Listening socket configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (e.g., "127.0.0.1:8081"). IPv4 only.
    #[serde(default = "default_listen_addr")]
    pub address: SocketAddr,

    /// TCP accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Enable SO_REUSEPORT
    #[serde(default)]
    pub reuse_port: bool,
}

impl ListenConfig {
    /// Listen configuration for `address` with default socket options
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Validate listen configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.address.is_ipv4() {
            return Err(ConfigError::validation(format!(
                "listen address {} is not IPv4; original destination recovery is IPv4 only",
                self.address
            )));
        }

        if self.backlog == 0 {
            return Err(ConfigError::validation("backlog must be greater than 0"));
        }

        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_LISTEN_ADDR,
            backlog: default_backlog(),
            reuse_port: false,
        }
    }
}

/// Upstream dial and byte transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Upstream connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-direction copy buffer size
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Seconds without traffic in either direction before a session is
    /// dropped (0 disables)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// After one side sends end-of-stream, how long the other direction may
    /// go without moving data, in seconds (0 tears down on the first completion)
    #[serde(default = "default_half_close_timeout_secs")]
    pub half_close_timeout_secs: u64,

    /// SO_MARK applied to upstream sockets, so packet-filter rules can skip
    /// the proxy's own traffic
    #[serde(default)]
    pub routing_mark: Option<u32>,

    /// Forward every connection here instead of its original destination
    #[serde(default)]
    pub static_destination: Option<SocketAddr>,
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 || self.connect_timeout_ms > MAX_CONNECT_TIMEOUT_MS {
            return Err(ConfigError::validation(format!(
                "connect_timeout_ms must be in 1..={MAX_CONNECT_TIMEOUT_MS}, got {}",
                self.connect_timeout_ms
            )));
        }

        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigError::validation(format!(
                "buffer_size must be in {MIN_BUFFER_SIZE}..={MAX_BUFFER_SIZE}, got {}",
                self.buffer_size
            )));
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get idle timeout, `None` when disabled
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_secs))
        }
    }

    /// Get half-close linger as Duration
    #[must_use]
    pub const fn half_close_timeout(&self) -> Duration {
        Duration::from_secs(self.half_close_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            buffer_size: default_buffer_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            half_close_timeout_secs: default_half_close_timeout_secs(),
            routing_mark: None,
            static_destination: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::validation(format!(
                "log format must be \"text\" or \"json\", got \"{other}\""
            ))),
        }
    }

    /// Whether JSON output is selected
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

/// PID file configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PidFileConfig {
    /// PID file location
    #[serde(default = "default_pid_file_path")]
    pub path: PathBuf,

    /// Whether to write and check the PID file at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PidFileConfig {
    /// Validate PID file configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.as_os_str().is_empty() {
            return Err(ConfigError::validation("pid_file.path must not be empty"));
        }
        Ok(())
    }
}

impl Default for PidFileConfig {
    fn default() -> Self {
        Self {
            path: default_pid_file_path(),
            enabled: true,
        }
    }
}

// Default value functions for serde
const fn default_true() -> bool {
    true
}

const fn default_listen_addr() -> SocketAddr {
    DEFAULT_LISTEN_ADDR
}

const fn default_backlog() -> u32 {
    1024
}

const fn default_connect_timeout_ms() -> u64 {
    5000
}

const fn default_buffer_size() -> usize {
    16 * 1024
}

const fn default_idle_timeout_secs() -> u64 {
    300
}

const fn default_half_close_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_pid_file_path() -> PathBuf {
    PathBuf::from("/tmp/ya-proxy.pid")
}

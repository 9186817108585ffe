//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Override for `listen.address`
pub const ENV_LISTEN_ADDR: &str = "YA_PROXY_LISTEN_ADDR";
/// Override for `log.level`
pub const ENV_LOG_LEVEL: &str = "YA_PROXY_LOG_LEVEL";
/// Override for `connection.connect_timeout_ms`
pub const ENV_CONNECT_TIMEOUT_MS: &str = "YA_PROXY_CONNECT_TIMEOUT_MS";
/// Override for `pid_file.path`
pub const ENV_PID_FILE: &str = "YA_PROXY_PID_FILE";

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: listen={}, connect_timeout={}ms",
        config.listen.address, config.connection.connect_timeout_ms
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from a file, then apply environment overrides
///
/// # Errors
///
/// Returns `ConfigError` if loading, an override, or re-validation fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Apply environment variable overrides and re-validate
///
/// Environment variables:
/// - `YA_PROXY_LISTEN_ADDR`: listen address
/// - `YA_PROXY_LOG_LEVEL`: log level
/// - `YA_PROXY_CONNECT_TIMEOUT_MS`: upstream connect timeout
/// - `YA_PROXY_PID_FILE`: PID file path
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for unparsable values and
/// `ConfigError::ValidationError` if the result is invalid.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
        config.listen.address = addr
            .parse()
            .map_err(|_| {
                ConfigError::env(ENV_LISTEN_ADDR, format!("Invalid socket address: {addr}"))
            })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Ok(ms) = std::env::var(ENV_CONNECT_TIMEOUT_MS) {
        config.connection.connect_timeout_ms = ms
            .parse()
            .map_err(|_| {
                ConfigError::env(ENV_CONNECT_TIMEOUT_MS, format!("Invalid number: {ms}"))
            })?;
        debug!(
            "Connect timeout overridden to {}ms",
            config.connection.connect_timeout_ms
        );
    }

    if let Ok(path) = std::env::var(ENV_PID_FILE) {
        config.pid_file.path = path.into();
        debug!("PID file path overridden to {:?}", config.pid_file.path);
    }

    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}

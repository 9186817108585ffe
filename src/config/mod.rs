//! Configuration module for ya-proxy
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use ya_proxy::config::{load_config_with_env, Config};
//!
//! let config = load_config_with_env("/etc/ya-proxy/config.json").unwrap();
//! println!("Listening on {}", config.listen.address);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env, ENV_CONNECT_TIMEOUT_MS, ENV_LISTEN_ADDR, ENV_LOG_LEVEL, ENV_PID_FILE,
};
pub use types::{
    Config, ConnectionConfig, ListenConfig, LogConfig, PidFileConfig, DEFAULT_LISTEN_ADDR,
    MAX_BUFFER_SIZE, MAX_CONNECT_TIMEOUT_MS, MIN_BUFFER_SIZE,
};

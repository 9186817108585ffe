//! Error types for ya-proxy
//!
//! Errors are grouped by subsystem. Each group knows whether the failing
//! operation may be retried.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub use crate::codec::DecodeError;
pub use crate::io::Direction;

/// Top-level error type for ya-proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener, session and transport errors
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// TCP header decode errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// PID file errors
    #[error("PID file error: {0}")]
    PidFile(#[from] PidFileError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Decode(_) | Self::PidFile(_) => false,
            Self::Bridge(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors need the operator to fix the file or environment
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create an environment variable error
    pub fn env(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvError {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the listener, the accept loop and individual sessions
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Listener could not be bound
    #[error("Failed to listen on {addr}: {reason}")]
    ListenFailed { addr: SocketAddr, reason: String },

    /// Accept failed but the listener is still usable (handled by back-off)
    #[error("Transient accept error: {0}")]
    TransientAccept(#[source] io::Error),

    /// Accept failed and the listener is unusable
    #[error("Permanent accept error: {0}")]
    PermanentAccept(#[source] io::Error),

    /// Original destination could not be recovered
    #[error("No original destination: {0}")]
    NoOriginalDestination(String),

    /// Upstream connect failed or timed out
    #[error("Failed to connect upstream to {addr}: {reason}")]
    UpstreamDialFailed { addr: SocketAddr, reason: String },

    /// A copy direction ended with an error other than end-of-stream
    #[error("Copy {direction} aborted: {reason}")]
    CopyAborted { direction: Direction, reason: String },
}

impl BridgeError {
    /// Whether the accept loop survives this error.
    ///
    /// Per-session errors end only their own session and are therefore
    /// recoverable from the bridge's point of view.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::ListenFailed { .. } | Self::PermanentAccept(_) => false,
            Self::TransientAccept(_)
            | Self::NoOriginalDestination(_)
            | Self::UpstreamDialFailed { .. }
            | Self::CopyAborted { .. } => true,
        }
    }

    /// Create a listen failure
    pub fn listen_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::ListenFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Create an original-destination failure
    pub fn no_original_destination(reason: impl Into<String>) -> Self {
        Self::NoOriginalDestination(reason.into())
    }

    /// Create an upstream dial failure
    pub fn upstream_dial_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::UpstreamDialFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Create a copy abort
    pub fn copy_aborted(direction: Direction, reason: impl Into<String>) -> Self {
        Self::CopyAborted {
            direction,
            reason: reason.into(),
        }
    }
}

/// PID file errors
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Another live instance owns the PID file
    #[error("Another instance is already running (pid {pid}, {})", path.display())]
    AlreadyRunning { pid: u32, path: PathBuf },

    /// PID file could not be read, written or removed
    #[error("PID file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Type alias for Result with ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

//! Error types for the DevHub service
//!
//! This module defines all error types used throughout the workspace.

use thiserror::Error;

/// Result type alias for DevHub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DevHub service
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (bad option values, invalid descriptors)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config store errors (reading or writing the descriptor file)
    #[error("Config store error: {0}")]
    ConfigStore(String),

    /// A plugin failed to construct or load
    #[error("Plugin error ({plugin}): {message}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// Error message
        message: String,
    },

    /// No factory registered under the descriptor's path
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A route registration overlaps an existing one
    #[error("Route conflict: {0}")]
    RouteConflict(String),

    /// Malformed or unexpected discovery traffic
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Proxy transport failures
    #[error("Proxy error ({target}): {message}")]
    Proxy {
        /// Target origin
        target: String,
        /// Error message
        message: String,
    },

    /// Lifecycle misuse (e.g. loading a plugin twice)
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors (sockets, files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a config store error
    pub fn config_store(msg: impl Into<String>) -> Self {
        Self::ConfigStore(msg.into())
    }

    /// Create a plugin-specific error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create an unknown plugin error
    pub fn unknown_plugin(path: impl Into<String>) -> Self {
        Self::UnknownPlugin(path.into())
    }

    /// Create a route conflict error
    pub fn route_conflict(msg: impl Into<String>) -> Self {
        Self::RouteConflict(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a proxy error
    pub fn proxy(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Proxy {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

//! Core error types for doorman

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Hallway file or directory not found
    #[error("Hallway file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid hallway config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// I/O error reading or writing a hallway file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that terminate a single hallway.
///
/// Hallways are isolated from one another; one hallway failing with
/// any of these does not affect its siblings.
#[derive(Error, Debug)]
pub enum HallwayError {
    /// Configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A listener socket could not be bound
    #[error("Failed to bind {kind} port {port}: {source}")]
    Bind {
        /// "tcp" or "udp"
        kind: &'static str,
        /// The port that could not be bound
        port: u16,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// I/O error on the packet path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

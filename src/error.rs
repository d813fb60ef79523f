//! # Error Types
//!
//! Custom error types for the calibration monitor using `thiserror`.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the calibration monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Transport could not be validated or bound
    #[error("Connection error: {0}")]
    Connection(String),

    /// The startup wait was cancelled before a system connected
    #[error("Handshake cancelled before any system connected")]
    HandshakeCancelled,

    /// No system connected within the configured handshake timeout
    #[error("No system connected within {0:?}")]
    HandshakeTimeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the calibration monitor
pub type Result<T> = std::result::Result<T, MonitorError>;

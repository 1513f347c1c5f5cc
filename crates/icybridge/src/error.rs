//! Error types for Icybridge
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// Main error type for the relay engine
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for Icybridge
pub type Result<T> = std::result::Result<T, BridgeError>;

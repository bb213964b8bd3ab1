//! Error types for meshkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("Durable log error: {0}")]
    Log(String),

    #[error("Durable log disabled after an earlier write fault")]
    LogFaulted,

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// A complete frame whose body is not UTF-8. The stream is still
    /// aligned on the next frame.
    #[error("Frame is not valid UTF-8")]
    InvalidText,

    // === Replication Errors ===
    #[error("Bootstrap from {seed} failed: {reason}")]
    Bootstrap { seed: String, reason: String },

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    // === Membership Errors ===
    #[error("Gossip codec error: {0}")]
    Gossip(#[from] bincode::Error),

    // === Node Errors ===
    #[error("Invalid node state transition: {0}")]
    InvalidState(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a transient network error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::PeerUnreachable(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Errors that mean the durable log can no longer guarantee durability.
    pub fn is_durability_fault(&self) -> bool {
        matches!(self, Error::Log(_) | Error::LogFaulted)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

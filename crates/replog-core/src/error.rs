//! Error types for replog core

use thiserror::Error;

/// Result type alias using replog Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the replicated log
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from sockets
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol errors (framing, CRC, serialization)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// RPC deadline exceeded
    #[error("RPC timeout: {0}")]
    Timeout(String),

    /// Remote side answered with a non-OK status
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Status code reported by the peer
        code: u32,
        /// Message reported by the peer
        message: String,
    },

    /// Write concern outside the accepted range
    #[error("Invalid write concern {requested}: must be between 1 and {max}")]
    InvalidWriteConcern {
        /// Requested write concern
        requested: u32,
        /// Largest accepted write concern
        max: u32,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a remote status error
    pub fn remote(code: u32, msg: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure is worth another attempt against the same peer.
    ///
    /// Timeouts, remote non-OK statuses and connection-level I/O errors are
    /// transient. Protocol and configuration errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Remote { .. } => true,
            Error::Io(io_error) => matches!(
                io_error.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

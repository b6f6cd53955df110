//! Error handling for the stream client.

use std::time::Duration;

use thiserror::Error;

/// The result type used throughout the crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error type for all stream-client operations.
///
/// None of these are fatal to the caller: transport-level failures feed
/// the reconnect policy, and the worst terminal outcome is a session in
/// the `Closed` state.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Failed to establish a connection.
    #[error("Connect error: {message}")]
    Connect { message: String },

    /// The transport failed after being established (abrupt close,
    /// network drop, rejected send).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The server answered the stream request with a non-success status.
    #[error("Invalid response status: {status}")]
    InvalidStatus { status: u16 },

    /// Configuration errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors.
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The session or connection is closed.
    #[error("Connection closed{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed { reason: Option<String> },
}

impl StreamError {
    /// Create a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a closed error.
    pub fn closed(reason: Option<String>) -> Self {
        Self::Closed { reason }
    }

    /// Create an invalid-status error.
    pub fn invalid_status(status: u16) -> Self {
        Self::InvalidStatus { status }
    }
}

//! Error types for the LeadPulse streaming client

use std::time::Duration;

use thiserror::Error;

/// Result type alias for streaming client operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur on the progress stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// No access token was available when the connection needed one
    #[error("no access token available")]
    Authentication,

    /// Transport-level connection failure (handshake, socket, stream)
    #[error("connection error: {0}")]
    Connection(String),

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse a message or response body
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// A subscription outlived its timeout without reaching a terminal state
    #[error("subscription timed out after {after:?}")]
    Timeout { after: Duration },

    /// Every reconnect attempt on the last transport tier failed
    #[error("connection lost: {attempts} reconnect attempts exhausted")]
    MaxRetriesExceeded { attempts: u32 },

    /// The subscription was closed before a terminal state arrived
    #[error("subscription closed")]
    Closed,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StreamError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is an authentication failure
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication)
            || matches!(self, Self::ApiError { status: 401 | 403, .. })
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error means the stream gave up retrying
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }
}

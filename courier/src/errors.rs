//! Error types for courier.
//!
//! `ApiError` is the taxonomy callers see in a failed result. Transport
//! failures arrive as `TransportError` and are classified into it, or passed
//! through unchanged when their code is not recognized.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A failure reported to the completion of an executed request.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The operation was cancelled.
    #[error("Request cancelled")]
    Canceled,

    /// No connectivity, or the request timed out.
    #[error("Connection error")]
    Connection,

    /// Authentication failed.
    #[error("Unauthorized")]
    Unauthorized,

    /// The server reported an internal failure.
    #[error("Internal server error")]
    InternalServer,

    /// The transport finished with neither a response nor an error.
    #[error("Undefined transport state: no response and no error")]
    Undefined,

    /// An unrecognized transport error, forwarded as-is.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    /// Returns true for [`ApiError::Canceled`].
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns a short stable name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Canceled => "canceled",
            Self::Connection => "connection",
            Self::Unauthorized => "unauthorized",
            Self::InternalServer => "internal_server",
            Self::Undefined => "undefined",
            Self::Transport(_) => "transport",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        if let Self::Transport(err) = self {
            map.insert("code".to_string(), serde_json::json!(err.code));
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// A native error produced by the transport layer.
///
/// Codes follow the URL-loading convention of negative values for
/// client-side failures. Positive codes carry an HTTP status when the
/// transport reports one as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Transport error {code}: {message}")]
pub struct TransportError {
    /// The transport error code.
    pub code: i32,
    /// Human readable description.
    pub message: String,
}

impl TransportError {
    /// Unclassified failure.
    pub const UNKNOWN: i32 = -1;
    /// The request body could not be encoded.
    pub const ENCODING_FAILED: i32 = -2;
    /// The destination file could not be written.
    pub const CANNOT_WRITE_TO_FILE: i32 = -3000;
    /// The transfer was cancelled.
    pub const CANCELLED: i32 = -999;
    /// The request timed out.
    pub const TIMED_OUT: i32 = -1001;
    /// The host refused or could not accept the connection.
    pub const CANNOT_CONNECT_TO_HOST: i32 = -1004;
    /// The connection dropped mid-transfer.
    pub const NETWORK_CONNECTION_LOST: i32 = -1005;
    /// No network connectivity.
    pub const NOT_CONNECTED_TO_INTERNET: i32 = -1009;

    /// Creates a new transport error.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(Self::CANCELLED, "cancelled")
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(Self::TIMED_OUT, message)
    }

    /// Creates an encoding error.
    #[must_use]
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::new(Self::ENCODING_FAILED, message)
    }

    /// Creates an error carrying an HTTP status as its code.
    #[must_use]
    pub fn http_status(status: u16) -> Self {
        Self::new(i32::from(status), format!("HTTP status {status}"))
    }

    /// Whether this error reports a cancelled transfer.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == Self::CANCELLED
    }
}

/// Errors raised while building an executor or transport.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The base URL is empty or not an http(s) URL.
    #[error("Invalid base URL: '{0}'")]
    InvalidBaseUrl(String),

    /// A numeric setting is out of range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// No Tokio runtime was supplied or found on the current thread.
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    /// No transport was supplied and no default transport is compiled in.
    #[error("No transport configured")]
    MissingTransport,

    /// The underlying HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// The configuration document could not be parsed.
    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_constructors() {
        let err = TransportError::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.code, TransportError::CANCELLED);

        let err = TransportError::http_status(401);
        assert_eq!(err.code, 401);
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new(-1009, "offline");
        assert_eq!(err.to_string(), "Transport error -1009: offline");
    }

    #[test]
    fn test_api_error_passthrough_is_transparent() {
        let err: ApiError = TransportError::new(42, "odd").into();
        assert_eq!(err.to_string(), "Transport error 42: odd");
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_api_error_to_dict() {
        let dict = ApiError::Canceled.to_dict();
        assert_eq!(dict.get("type").unwrap(), "canceled");
        assert!(dict.get("code").is_none());

        let dict = ApiError::Transport(TransportError::new(7, "x")).to_dict();
        assert_eq!(dict.get("code").unwrap(), 7);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidBaseUrl("ftp://x".to_string());
        assert!(err.to_string().contains("ftp://x"));
    }
}

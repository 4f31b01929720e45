//! Request lifecycle observers.

use tracing::Level;
use uuid::Uuid;

use crate::errors::ApiError;

/// The kind of operation an executor ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A plain request.
    Request,
    /// A download to a file.
    Download,
    /// A multipart upload.
    Upload,
}

impl OperationKind {
    /// Returns the kind as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability callbacks for executed operations.
pub trait RequestObserver: Send + Sync {
    /// Called when an operation is dispatched.
    fn on_start(&self, request_id: Uuid, kind: OperationKind, method: &str, url: &str);

    /// Called when an operation completes with a response.
    fn on_complete(&self, request_id: Uuid, status: u16, duration_ms: f64);

    /// Called when an operation fails.
    fn on_error(&self, request_id: Uuid, error: &ApiError, duration_ms: f64);

    /// Called when a cancel action reaches the transport handle.
    fn on_cancel(&self, request_id: Uuid);
}

/// Observer that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRequestObserver;

impl RequestObserver for NoOpRequestObserver {
    fn on_start(&self, _request_id: Uuid, _kind: OperationKind, _method: &str, _url: &str) {}
    fn on_complete(&self, _request_id: Uuid, _status: u16, _duration_ms: f64) {}
    fn on_error(&self, _request_id: Uuid, _error: &ApiError, _duration_ms: f64) {}
    fn on_cancel(&self, _request_id: Uuid) {}
}

/// Observer that writes structured `tracing` events.
///
/// Start and completion are logged at the configured level. Failures other
/// than cancellation are logged at `WARN`.
#[derive(Debug, Clone)]
pub struct LoggingRequestObserver {
    level: Level,
}

impl Default for LoggingRequestObserver {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggingRequestObserver {
    /// Creates an observer logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level observer.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level observer.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    /// The configured level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }
}

impl RequestObserver for LoggingRequestObserver {
    fn on_start(&self, request_id: Uuid, kind: OperationKind, method: &str, url: &str) {
        if self.level >= Level::DEBUG {
            tracing::debug!(%request_id, %kind, method, url, "Request dispatched");
        } else {
            tracing::info!(%request_id, %kind, method, url, "Request dispatched");
        }
    }

    fn on_complete(&self, request_id: Uuid, status: u16, duration_ms: f64) {
        if self.level >= Level::DEBUG {
            tracing::debug!(%request_id, status, duration_ms, "Request completed");
        } else {
            tracing::info!(%request_id, status, duration_ms, "Request completed");
        }
    }

    fn on_error(&self, request_id: Uuid, error: &ApiError, duration_ms: f64) {
        if error.is_canceled() {
            tracing::debug!(%request_id, duration_ms, "Request cancelled");
        } else {
            tracing::warn!(
                %request_id,
                error_kind = error.kind(),
                %error,
                duration_ms,
                "Request failed"
            );
        }
    }

    fn on_cancel(&self, request_id: Uuid) {
        tracing::debug!(%request_id, "Cancel forwarded to transport");
    }
}

//! Classification of transport outcomes into results.

use crate::errors::{ApiError, TransportError};
use crate::response::{ApiResponse, ApiResult};
use crate::transport::TransportOutcome;

/// Maps native transport errors onto the [`ApiError`] taxonomy.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorClassifier: Send + Sync {
    /// Classifies `error`, or returns it as [`ApiError::Transport`] when the
    /// code is not recognized.
    fn classify(&self, error: TransportError) -> ApiError;
}

/// The stock error classifier.
///
/// Codes 401 and 500 are only seen when the transport reports HTTP statuses
/// as errors, which `ReqwestTransport` does with `error_for_status` enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorClassifier;

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, error: TransportError) -> ApiError {
        match error.code {
            TransportError::CANCELLED => ApiError::Canceled,
            TransportError::TIMED_OUT
            | TransportError::CANNOT_CONNECT_TO_HOST
            | TransportError::NETWORK_CONNECTION_LOST
            | TransportError::NOT_CONNECTED_TO_INTERNET => ApiError::Connection,
            401 => ApiError::Unauthorized,
            500 => ApiError::InternalServer,
            _ => ApiError::Transport(error),
        }
    }
}

/// Turns a transport outcome into the result handed to the completion.
///
/// A response with a body is a success. Otherwise the error is classified,
/// and an outcome with neither is [`ApiError::Undefined`].
pub fn resolve_outcome(outcome: TransportOutcome, classifier: &dyn ErrorClassifier) -> ApiResult {
    match outcome {
        TransportOutcome {
            response: Some(response),
            body: Some(body),
            file,
            ..
        } => Ok(ApiResponse {
            response,
            body,
            file,
        }),
        TransportOutcome {
            error: Some(error), ..
        } => Err(classifier.classify(error)),
        _ => Err(ApiError::Undefined),
    }
}

//! Future adapter over callback-based execution.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::cancellation::Cancelable;
use crate::errors::ApiError;
use crate::response::{ApiResult, ApiResultResponse};

/// An operation in flight, awaitable for its result.
///
/// Dropping the future does not cancel the operation; call
/// [`cancel`](Self::cancel) or keep the [`Cancelable`] from
/// [`cancelable`](Self::cancelable).
pub struct PendingResponse {
    cancelable: Arc<dyn Cancelable>,
    receiver: oneshot::Receiver<ApiResult>,
}

impl PendingResponse {
    /// Requests cancellation of the operation.
    pub fn cancel(&self) {
        self.cancelable.cancel();
    }

    /// Returns the operation's cancel handle.
    #[must_use]
    pub fn cancelable(&self) -> Arc<dyn Cancelable> {
        Arc::clone(&self.cancelable)
    }

    pub(crate) fn channel() -> (ApiResultResponse, oneshot::Receiver<ApiResult>) {
        let (sender, receiver) = oneshot::channel();
        let completion: ApiResultResponse = Box::new(move |result| {
            // The receiver may already be gone
            let _ = sender.send(result);
        });
        (completion, receiver)
    }

    pub(crate) fn new(cancelable: Arc<dyn Cancelable>, receiver: oneshot::Receiver<ApiResult>) -> Self {
        Self {
            cancelable,
            receiver,
        }
    }
}

impl Future for PendingResponse {
    type Output = ApiResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ApiError::Undefined)))
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse").finish_non_exhaustive()
    }
}

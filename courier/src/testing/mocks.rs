//! Mock transport and observer for testing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::errors::{ApiError, TransportError};
use crate::observability::{OperationKind, RequestObserver};
use crate::request::{MultipartFormData, Progress};
use crate::response::RawResponse;
use crate::transport::{InFlight, Transport, TransportHandle, TransportOutcome, TransportRequest};

/// When a mock transfer finishes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockCompletion {
    /// As soon as it is polled.
    #[default]
    Immediate,
    /// After a delay.
    After(Duration),
    /// Only when cancelled.
    Never,
}

/// A transport handle that counts cancel calls.
#[derive(Debug)]
pub struct MockHandle {
    url: String,
    cancels: AtomicUsize,
    notify: Notify,
}

impl MockHandle {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cancels: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// URL of the transfer this handle belongs to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of times `cancel` was called.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl TransportHandle for MockHandle {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

/// A scriptable [`Transport`].
///
/// Transfers finish per [`MockCompletion`] with the scripted outcome, or
/// with a cancellation error if their handle is cancelled first. Without a
/// scripted outcome, requests succeed with status 200 and an empty body and
/// downloads report their destination.
#[derive(Debug, Default)]
pub struct MockTransport {
    outcome: Mutex<Option<TransportOutcome>>,
    completion: Mutex<MockCompletion>,
    encode_gate: Mutex<Option<Arc<Notify>>>,
    encode_failure: Mutex<Option<TransportError>>,
    requests: Mutex<Vec<TransportRequest>>,
    destinations: Mutex<Vec<PathBuf>>,
    forms: Mutex<Vec<MultipartFormData>>,
    handles: Mutex<Vec<Arc<MockHandle>>>,
}

impl MockTransport {
    /// Creates a transport whose transfers succeed immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finishes every transfer with `outcome`.
    #[must_use]
    pub fn with_outcome(self, outcome: TransportOutcome) -> Self {
        *self.outcome.lock() = Some(outcome);
        self
    }

    /// Sets when transfers finish.
    #[must_use]
    pub fn with_completion(self, completion: MockCompletion) -> Self {
        *self.completion.lock() = completion;
        self
    }

    /// Holds multipart encoding until `gate` is notified.
    #[must_use]
    pub fn with_encode_gate(self, gate: Arc<Notify>) -> Self {
        *self.encode_gate.lock() = Some(gate);
        self
    }

    /// Fails multipart encoding with `error`.
    #[must_use]
    pub fn with_encode_failure(self, error: TransportError) -> Self {
        *self.encode_failure.lock() = Some(error);
        self
    }

    /// Requests received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// Download destinations received, in order.
    #[must_use]
    pub fn destinations(&self) -> Vec<PathBuf> {
        self.destinations.lock().clone()
    }

    /// Multipart forms received, in order.
    #[must_use]
    pub fn forms(&self) -> Vec<MultipartFormData> {
        self.forms.lock().clone()
    }

    /// Handles of started transfers, in order.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    fn start(&self, request: TransportRequest, destination: Option<PathBuf>) -> InFlight {
        let outcome = self.outcome.lock().clone().unwrap_or_else(|| {
            let raw = RawResponse::new(200, request.url.clone());
            match &destination {
                Some(path) => TransportOutcome::downloaded(raw, path.clone()),
                None => TransportOutcome::success(raw, Bytes::new()),
            }
        });
        let completion = *self.completion.lock();
        let progress = request.progress.clone();
        let handle = Arc::new(MockHandle::new(request.url.clone()));
        self.requests.lock().push(request);
        self.handles.lock().push(Arc::clone(&handle));

        let waiter = Arc::clone(&handle);
        let future = async move {
            let finished = async {
                match completion {
                    MockCompletion::Immediate => {}
                    MockCompletion::After(delay) => tokio::time::sleep(delay).await,
                    MockCompletion::Never => futures::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                () = waiter.notify.notified() => TransportOutcome::failure(TransportError::cancelled()),
                () = finished => {
                    if let (Some(progress), Some(body)) = (progress, &outcome.body) {
                        let len = body.len() as u64;
                        progress(Progress::new(len, Some(len)));
                    }
                    outcome
                }
            }
        };

        InFlight {
            handle,
            completion: future.boxed(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn send(&self, request: TransportRequest) -> InFlight {
        self.start(request, None)
    }

    fn download(&self, request: TransportRequest, destination: PathBuf) -> InFlight {
        self.destinations.lock().push(destination.clone());
        self.start(request, Some(destination))
    }

    async fn upload_multipart(
        &self,
        form: MultipartFormData,
        request: TransportRequest,
    ) -> Result<InFlight, TransportError> {
        self.forms.lock().push(form);

        let gate = self.encode_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = self.encode_failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(self.start(request, None))
    }
}

/// An observer that records callbacks as short strings.
///
/// Entries look like `start:request`, `complete:200`, `error:canceled` and
/// `cancel`.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, in order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl RequestObserver for RecordingObserver {
    fn on_start(&self, _request_id: Uuid, kind: OperationKind, _method: &str, _url: &str) {
        self.events.lock().push(format!("start:{kind}"));
    }

    fn on_complete(&self, _request_id: Uuid, status: u16, _duration_ms: f64) {
        self.events.lock().push(format!("complete:{status}"));
    }

    fn on_error(&self, _request_id: Uuid, error: &ApiError, _duration_ms: f64) {
        self.events.lock().push(format!("error:{}", error.kind()));
    }

    fn on_cancel(&self, _request_id: Uuid) {
        self.events.lock().push("cancel".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpMethod;

    fn request() -> TransportRequest {
        TransportRequest::new(HttpMethod::Get, "http://mock/a")
    }

    #[tokio::test]
    async fn test_default_outcome_echoes_url() {
        let transport = MockTransport::new();
        let outcome = transport.send(request()).completion.await;
        assert_eq!(outcome.response.unwrap().url, "http://mock/a");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_poll_wins() {
        let transport = MockTransport::new();
        let in_flight = transport.send(request());
        in_flight.handle.cancel();

        let outcome = in_flight.completion.await;
        assert_eq!(outcome.error, Some(TransportError::cancelled()));
        assert_eq!(transport.handles()[0].cancel_count(), 1);
        assert_eq!(transport.handles()[0].url(), "http://mock/a");
    }

    #[tokio::test]
    async fn test_never_completes_until_cancelled() {
        let transport = MockTransport::new().with_completion(MockCompletion::Never);
        let in_flight = transport.send(request());
        let handle = Arc::clone(&in_flight.handle);

        let waiter = tokio::spawn(in_flight.completion);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handle.cancel();
        let outcome = waiter.await.unwrap();
        assert!(outcome.error.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_encode_failure() {
        let transport = MockTransport::new().with_encode_failure(TransportError::encoding_failed("bad"));
        let result = transport.upload_multipart(MultipartFormData::new(), request()).await;
        assert_eq!(result.unwrap_err().code, TransportError::ENCODING_FAILED);
        assert_eq!(transport.forms().len(), 1);
        assert!(transport.handles().is_empty());
    }

    #[test]
    fn test_recording_observer() {
        let observer = RecordingObserver::new();
        let id = Uuid::new_v4();
        observer.on_start(id, OperationKind::Upload, "POST", "http://mock/");
        observer.on_cancel(id);
        observer.on_error(id, &ApiError::Canceled, 1.0);
        assert_eq!(observer.events(), vec!["start:upload", "cancel", "error:canceled"]);
    }
}

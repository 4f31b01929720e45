//! Request execution.
//!
//! Every operation follows the same pattern: a token source is created
//! before anything else and handed back to the caller, the transport call is
//! started on the runtime, and the transport's native cancel is registered
//! with the token the moment its handle exists. A cancel that arrives before
//! that point runs at registration, so the transfer is stopped as soon as it
//! can be.

mod pending;

pub use pending::PendingResponse;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancellation::{Cancelable, CancellationToken, CancellationTokenSource};
use crate::classify::{resolve_outcome, DefaultErrorClassifier, ErrorClassifier};
use crate::config::{ExecutorConfig, TransportConfig};
use crate::errors::{ApiError, ConfigError, TransportError};
use crate::observability::{LoggingRequestObserver, OperationKind, RequestObserver, SpanTimer};
use crate::request::ApiRequest;
use crate::response::{ApiResult, ApiResultResponse};
use crate::transport::{InFlight, Transport, TransportRequest};

type TransferStart = BoxFuture<'static, Result<InFlight, TransportError>>;

type StartTransfer = Box<dyn FnOnce(Arc<dyn Transport>, TransportRequest) -> TransferStart + Send>;

/// Issues requests against a base endpoint through an injected transport.
///
/// Each `execute*` call returns a [`Cancelable`] immediately and reports
/// the outcome to its completion exactly once, on a runtime worker.
#[derive(Clone)]
pub struct RequestExecutor {
    base_url: String,
    default_headers: HashMap<String, String>,
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn ErrorClassifier>,
    observer: Arc<dyn RequestObserver>,
    runtime: Handle,
}

impl RequestExecutor {
    /// Starts building an executor from `config`.
    #[must_use]
    pub fn builder(config: ExecutorConfig) -> RequestExecutorBuilder {
        RequestExecutorBuilder::new(config)
    }

    /// Builds an executor with the default transport, classifier and
    /// observer on the current Tokio runtime.
    pub fn new(config: ExecutorConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    /// The normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Executes a plain request.
    pub fn execute<F>(&self, request: &ApiRequest, completion: F) -> Arc<dyn Cancelable>
    where
        F: FnOnce(ApiResult) + Send + 'static,
    {
        self.dispatch(
            OperationKind::Request,
            self.transport_request(request),
            Box::new(completion),
            Box::new(|transport: Arc<dyn Transport>, request: TransportRequest| -> TransferStart {
                async move { Ok(transport.send(request)) }.boxed()
            }),
        )
    }

    /// Downloads the response body of `request` into `destination`.
    pub fn execute_download<F>(
        &self,
        request: &ApiRequest,
        destination: impl Into<PathBuf>,
        completion: F,
    ) -> Arc<dyn Cancelable>
    where
        F: FnOnce(ApiResult) + Send + 'static,
    {
        let destination = destination.into();
        self.dispatch(
            OperationKind::Download,
            self.transport_request(request),
            Box::new(completion),
            Box::new(move |transport: Arc<dyn Transport>, request: TransportRequest| -> TransferStart {
                async move { Ok(transport.download(request, destination)) }.boxed()
            }),
        )
    }

    /// Encodes the request's multipart form and uploads it.
    ///
    /// The upload's cancel handle only exists once encoding finishes; a
    /// cancel requested earlier is applied at that point.
    ///
    /// # Panics
    ///
    /// Panics if the request carries no multipart form data.
    pub fn execute_upload<F>(&self, request: &ApiRequest, completion: F) -> Arc<dyn Cancelable>
    where
        F: FnOnce(ApiResult) + Send + 'static,
    {
        let Some(form) = request.multipart_form_data().cloned() else {
            panic!("multipart upload to '{}' has no multipart form data", request.path());
        };
        self.dispatch(
            OperationKind::Upload,
            self.transport_request(request),
            Box::new(completion),
            Box::new(move |transport: Arc<dyn Transport>, request: TransportRequest| -> TransferStart {
                async move { transport.upload_multipart(form, request).await }.boxed()
            }),
        )
    }

    /// Executes a plain request, returning an awaitable handle.
    pub fn send(&self, request: &ApiRequest) -> PendingResponse {
        let (completion, receiver) = PendingResponse::channel();
        PendingResponse::new(self.execute(request, completion), receiver)
    }

    /// Downloads into `destination`, returning an awaitable handle.
    pub fn download(&self, request: &ApiRequest, destination: impl Into<PathBuf>) -> PendingResponse {
        let (completion, receiver) = PendingResponse::channel();
        PendingResponse::new(self.execute_download(request, destination, completion), receiver)
    }

    /// Uploads a multipart form, returning an awaitable handle.
    ///
    /// # Panics
    ///
    /// Panics if the request carries no multipart form data.
    pub fn upload(&self, request: &ApiRequest) -> PendingResponse {
        let (completion, receiver) = PendingResponse::channel();
        PendingResponse::new(self.execute_upload(request, completion), receiver)
    }

    /// Resolves `path` against the base URL. Absolute URLs pass through.
    #[must_use]
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn transport_request(&self, request: &ApiRequest) -> TransportRequest {
        let mut headers = self.default_headers.clone();
        headers.extend(
            request
                .headers()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        TransportRequest {
            url: self.resolve_url(request.path()),
            method: request.method(),
            parameters: request.parameters().clone(),
            encoding: request.encoding(),
            headers,
            progress: request.progress_handler().cloned(),
        }
    }

    fn dispatch(
        &self,
        kind: OperationKind,
        request: TransportRequest,
        completion: ApiResultResponse,
        start: StartTransfer,
    ) -> Arc<dyn Cancelable> {
        let (source, token) = CancellationTokenSource::new_pair();
        let request_id = Uuid::new_v4();
        let transport = Arc::clone(&self.transport);
        let classifier = Arc::clone(&self.classifier);
        let observer = Arc::clone(&self.observer);

        observer.on_start(request_id, kind, request.method.as_str(), &request.url);
        let completion = CompletionGuard::new(completion);

        self.runtime.spawn(async move {
            let timer = SpanTimer::start(kind.as_str());
            let run = run_transfer(
                request_id,
                transport,
                request,
                start,
                &token,
                classifier.as_ref(),
                &observer,
            );
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    warn!(%request_id, "Transport panicked: {:?}", panic);
                    Err(ApiError::Undefined)
                }
            };

            let duration_ms = timer.finish();
            match &result {
                Ok(response) => observer.on_complete(request_id, response.status(), duration_ms),
                Err(error) => observer.on_error(request_id, error, duration_ms),
            }
            completion.complete(result);
        });

        Arc::new(source)
    }
}

async fn run_transfer(
    request_id: Uuid,
    transport: Arc<dyn Transport>,
    request: TransportRequest,
    start: StartTransfer,
    token: &CancellationToken,
    classifier: &dyn ErrorClassifier,
    observer: &Arc<dyn RequestObserver>,
) -> ApiResult {
    let in_flight = match start(transport, request).await {
        Ok(in_flight) => in_flight,
        Err(error) => return Err(classifier.classify(error)),
    };

    let phase = Arc::new(TransferPhase::default());
    let handle = Arc::clone(&in_flight.handle);
    let cancel_phase = Arc::clone(&phase);
    let cancel_observer = Arc::clone(observer);
    token.register(move || {
        if cancel_phase.forward_cancel() {
            cancel_observer.on_cancel(request_id);
            handle.cancel();
        }
    });
    debug!(%request_id, cancelled = token.is_cancelled(), "Cancel handle registered");

    let outcome = in_flight.completion.await;
    if !phase.finish() {
        debug!(%request_id, "Cancel forwarded before the outcome was taken");
        return Err(ApiError::Canceled);
    }
    resolve_outcome(outcome, classifier)
}

/// Whether a transfer's outcome or a forwarded cancel came first.
///
/// Exactly one of [`finish`](Self::finish) and
/// [`forward_cancel`](Self::forward_cancel) wins. A cancel after the
/// outcome is taken never reaches the handle. An outcome taken after a
/// cancel was forwarded is reported as cancelled, whatever the transport
/// returned.
#[derive(Debug, Default)]
struct TransferPhase(AtomicU8);

impl TransferPhase {
    const RUNNING: u8 = 0;
    const FINISHED: u8 = 1;
    const CANCEL_FORWARDED: u8 = 2;

    /// Marks the outcome as taken. Returns false if a cancel was forwarded first.
    fn finish(&self) -> bool {
        self.transition(Self::FINISHED)
    }

    /// Claims the right to cancel the handle. Returns false once finished.
    fn forward_cancel(&self) -> bool {
        self.transition(Self::CANCEL_FORWARDED)
    }

    fn transition(&self, to: u8) -> bool {
        self.0
            .compare_exchange(Self::RUNNING, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Calls the completion exactly once.
///
/// If the operation's task is dropped before reporting, for instance when
/// the runtime shuts down, the completion receives [`ApiError::Undefined`].
struct CompletionGuard {
    completion: Option<ApiResultResponse>,
}

impl CompletionGuard {
    fn new(completion: ApiResultResponse) -> Self {
        Self {
            completion: Some(completion),
        }
    }

    fn complete(mut self, result: ApiResult) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            warn!("Operation dropped before completing, reporting undefined result");
            completion(Err(ApiError::Undefined));
        }
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestExecutor`].
pub struct RequestExecutorBuilder {
    config: ExecutorConfig,
    transport: Option<Arc<dyn Transport>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    observer: Option<Arc<dyn RequestObserver>>,
    runtime: Option<Handle>,
}

impl RequestExecutorBuilder {
    /// Creates a builder from `config`.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            transport: None,
            classifier: None,
            observer: None,
            runtime: None,
        }
    }

    /// Sets the transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Sets the observer.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sets the runtime operations are spawned on.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validates the configuration and builds the executor.
    ///
    /// Without an explicit runtime the current Tokio runtime is used.
    pub fn build(self) -> Result<RequestExecutor, ConfigError> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| ConfigError::NoRuntime(e.to_string()))?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config.transport)?,
        };

        Ok(RequestExecutor {
            base_url: self.config.normalized_base_url(),
            default_headers: self.config.default_headers,
            transport,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(DefaultErrorClassifier)),
            observer: self
                .observer
                .unwrap_or_else(|| Arc::new(LoggingRequestObserver::default())),
            runtime,
        })
    }
}

impl std::fmt::Debug for RequestExecutorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutorBuilder")
            .field("config", &self.config)
            .field("has_transport", &self.transport.is_some())
            .field("has_runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "reqwest")]
fn default_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>, ConfigError> {
    Ok(Arc::new(crate::transport::ReqwestTransport::new(config.clone())?))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport(_config: &TransportConfig) -> Result<Arc<dyn Transport>, ConfigError> {
    Err(ConfigError::MissingTransport)
}

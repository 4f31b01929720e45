//! Transport layer interface.
//!
//! The executor never performs I/O itself. A [`Transport`] starts transfers
//! and hands back an [`InFlight`]: a native cancel handle plus a future that
//! resolves to the raw [`TransportOutcome`].

#[cfg(feature = "reqwest")]
mod http_client;

#[cfg(feature = "reqwest")]
pub use http_client::ReqwestTransport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::TransportError;
use crate::request::{HttpMethod, MultipartFormData, ParameterEncoding, ProgressHandler};
use crate::response::RawResponse;

/// The native object representing an in-flight transfer.
pub trait TransportHandle: Send + Sync {
    /// Asks the transport to stop the transfer.
    fn cancel(&self);
}

impl TransportHandle for tokio::task::AbortHandle {
    fn cancel(&self) {
        self.abort();
    }
}

/// Raw result of a transfer. Any combination of fields may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOutcome {
    /// Response metadata, if a response arrived.
    pub response: Option<RawResponse>,
    /// Response body, if it was read.
    pub body: Option<Bytes>,
    /// Destination file, for downloads.
    pub file: Option<PathBuf>,
    /// The transport error, if the transfer failed.
    pub error: Option<TransportError>,
}

impl TransportOutcome {
    /// A completed transfer with a body.
    #[must_use]
    pub fn success(response: RawResponse, body: Bytes) -> Self {
        Self {
            response: Some(response),
            body: Some(body),
            ..Default::default()
        }
    }

    /// A completed download written to `file`.
    #[must_use]
    pub fn downloaded(response: RawResponse, file: PathBuf) -> Self {
        Self {
            response: Some(response),
            body: Some(Bytes::new()),
            file: Some(file),
            error: None,
        }
    }

    /// A failed transfer.
    #[must_use]
    pub fn failure(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Neither a response nor an error.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Future resolving when a transfer finishes.
pub type TransportCompletion = BoxFuture<'static, TransportOutcome>;

/// A started transfer.
pub struct InFlight {
    /// Native cancel handle.
    pub handle: Arc<dyn TransportHandle>,
    /// Resolves to the transfer outcome.
    pub completion: TransportCompletion,
}

impl InFlight {
    /// Creates an in-flight transfer from a handle and a completion future.
    pub fn new<H, F>(handle: H, completion: F) -> Self
    where
        H: TransportHandle + 'static,
        F: Future<Output = TransportOutcome> + Send + 'static,
    {
        Self {
            handle: Arc::new(handle),
            completion: completion.boxed(),
        }
    }

    /// Runs `transfer` on a spawned Tokio task.
    ///
    /// The task's abort handle is the cancel handle. An aborted task
    /// completes with a cancellation error. Must be called within a Tokio
    /// runtime.
    pub fn spawn<F>(transfer: F) -> Self
    where
        F: Future<Output = TransportOutcome> + Send + 'static,
    {
        let task = tokio::spawn(transfer);
        let handle = task.abort_handle();
        Self::new(handle, async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => TransportOutcome::failure(TransportError::cancelled()),
                Err(e) => TransportOutcome::failure(TransportError::new(
                    TransportError::UNKNOWN,
                    format!("Transfer task failed: {e}"),
                )),
            }
        })
    }
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight").finish_non_exhaustive()
    }
}

/// A request resolved against the base URL, ready for the transport.
#[derive(Clone)]
pub struct TransportRequest {
    /// Absolute URL.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Parameters to encode.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Parameter encoding.
    pub encoding: ParameterEncoding,
    /// Headers, defaults already merged.
    pub headers: HashMap<String, String>,
    /// Progress callback.
    pub progress: Option<ProgressHandler>,
}

impl TransportRequest {
    /// Creates a request with no parameters or headers.
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            parameters: BTreeMap::new(),
            encoding: ParameterEncoding::default(),
            headers: HashMap::new(),
            progress: None,
        }
    }

    /// Flattened parameter pairs for query or form encoding.
    #[must_use]
    pub fn parameter_pairs(&self) -> Vec<(String, String)> {
        crate::request::flatten_parameters(&self.parameters)
    }
}

impl std::fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRequest")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("parameters", &self.parameters)
            .field("encoding", &self.encoding)
            .field("headers", &self.headers)
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

/// The HTTP stack the executor drives.
///
/// `send` and `download` start the transfer and return its handle at once.
/// `upload_multipart` first encodes the form, which may fail, and only then
/// yields the in-flight upload.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts a plain request.
    fn send(&self, request: TransportRequest) -> InFlight;

    /// Starts a download into `destination`.
    fn download(&self, request: TransportRequest, destination: PathBuf) -> InFlight;

    /// Encodes `form` and starts the upload.
    async fn upload_multipart(
        &self,
        form: MultipartFormData,
        request: TransportRequest,
    ) -> Result<InFlight, TransportError>;
}

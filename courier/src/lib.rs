//! # Courier
//!
//! Cancellable HTTP request execution.
//!
//! Courier issues requests, downloads and multipart uploads through a
//! pluggable transport and returns a cancel handle for each one immediately.
//! It provides:
//!
//! - **Deferred cancel registration**: a cancel requested before the
//!   transport's native handle exists is applied the moment it appears
//! - **Pluggable transports**: a `reqwest` transport by default, anything
//!   implementing [`transport::Transport`] otherwise
//! - **Error classification**: native transport errors mapped onto a small
//!   error taxonomy
//! - **Observability**: `tracing` events for every operation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! let executor = RequestExecutor::new(ExecutorConfig::new("https://api.example.com"))?;
//!
//! let cancelable = executor.execute(&ApiRequest::get("users"), |result| {
//!     println!("{result:?}");
//! });
//! cancelable.cancel();
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod classify;
pub mod config;
pub mod errors;
pub mod executor;
pub mod observability;
pub mod request;
pub mod response;
pub mod testing;
pub mod transport;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{Cancelable, CancellationToken, CancellationTokenSource};
    pub use crate::classify::{DefaultErrorClassifier, ErrorClassifier};
    pub use crate::config::{ExecutorConfig, TransportConfig};
    pub use crate::errors::{ApiError, ConfigError, TransportError};
    pub use crate::executor::{PendingResponse, RequestExecutor, RequestExecutorBuilder};
    pub use crate::observability::{LoggingRequestObserver, NoOpRequestObserver, RequestObserver};
    pub use crate::request::{ApiRequest, HttpMethod, MultipartFormData, MultipartPart, ParameterEncoding};
    pub use crate::response::{ApiResponse, ApiResult, RawResponse};
    pub use crate::transport::{InFlight, Transport, TransportHandle, TransportOutcome, TransportRequest};

    #[cfg(feature = "reqwest")]
    pub use crate::transport::ReqwestTransport;
}

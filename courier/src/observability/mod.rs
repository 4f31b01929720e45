//! Observability utilities.

mod observer;
mod tracing;

pub use observer::{LoggingRequestObserver, NoOpRequestObserver, OperationKind, RequestObserver};
pub use tracing::{init_tracing, LogFormat, SpanTimer};

//! Testing utilities for code built on courier.
//!
//! This module provides:
//! - A scriptable mock transport that records requests and cancel calls
//! - A recording request observer
//! - Assertions for operation results

mod assertions;
mod mocks;

pub use assertions::{assert_failed_with, assert_succeeded, assert_succeeded_with_status};
pub use mocks::{MockCompletion, MockHandle, MockTransport, RecordingObserver};

//! Cancellation primitives.
//!
//! This module provides:
//! - CancellationTokenSource, the owner of a one-shot cancellation signal
//! - CancellationToken for querying state and registering deferred cancel actions
//! - Cancelable, the cancel-only capability handed to callers

mod token;

pub use token::{CancelAction, Cancelable, CancellationToken, CancellationTokenSource};

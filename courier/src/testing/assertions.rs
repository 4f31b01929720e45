//! Test assertions for operation results.

use crate::response::{ApiResponse, ApiResult};

/// Asserts that the result is a success and returns the response.
pub fn assert_succeeded(result: &ApiResult) -> &ApiResponse {
    match result {
        Ok(response) => response,
        Err(e) => panic!("Expected success, got error: {e:?}"),
    }
}

/// Asserts that the result is a success with the expected status.
pub fn assert_succeeded_with_status(result: &ApiResult, expected: u16) {
    let response = assert_succeeded(result);
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

/// Asserts that the result failed with the given error kind
/// (see [`ApiError::kind`](crate::errors::ApiError::kind)).
pub fn assert_failed_with(result: &ApiResult, kind: &str) {
    match result {
        Ok(response) => panic!(
            "Expected '{}' failure, got success with status {}",
            kind,
            response.status()
        ),
        Err(e) => assert_eq!(e.kind(), kind, "Expected '{}' failure, got {:?}", kind, e),
    }
}

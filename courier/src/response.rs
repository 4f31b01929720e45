//! Response types delivered to request completions.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::ApiError;

/// Response metadata reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,
}

impl RawResponse {
    /// Creates a response with the given status and URL.
    #[must_use]
    pub fn new(status: u16, url: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A successful operation: the raw response and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// Response metadata.
    pub response: RawResponse,
    /// Response body. Empty for downloads.
    pub body: Bytes,
    /// Destination path for downloads.
    pub file: Option<PathBuf>,
}

impl ApiResponse {
    /// Creates a response carrying a body.
    #[must_use]
    pub fn new(response: RawResponse, body: Bytes) -> Self {
        Self {
            response,
            body,
            file: None,
        }
    }

    /// The HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.status
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// The body as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The outcome of an executed operation.
pub type ApiResult = Result<ApiResponse, ApiError>;

/// Completion invoked exactly once with the outcome of an operation.
pub type ApiResultResponse = Box<dyn FnOnce(ApiResult) + Send + 'static>;

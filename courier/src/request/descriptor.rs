//! The request descriptor consumed by the executor.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::multipart::MultipartFormData;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl HttpMethod {
    /// Returns the method name as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether URL encoding places parameters in the query string for this method.
    #[must_use]
    pub fn encodes_parameters_in_url(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How request parameters are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterEncoding {
    /// Query string for GET, HEAD and DELETE; form body otherwise.
    #[default]
    Url,
    /// Always the query string.
    Query,
    /// JSON object body.
    Json,
}

/// Transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes transferred so far.
    pub completed: u64,
    /// Total bytes expected, if known.
    pub total: Option<u64>,
}

impl Progress {
    /// Creates a progress value.
    #[must_use]
    pub fn new(completed: u64, total: Option<u64>) -> Self {
        Self { completed, total }
    }

    /// Fraction complete in `[0, 1]`, if the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Callback receiving transfer progress.
pub type ProgressHandler = Arc<dyn Fn(Progress) + Send + Sync>;

/// Describes one operation against the executor's base endpoint.
#[derive(Clone, Default)]
pub struct ApiRequest {
    path: String,
    method: HttpMethod,
    parameters: BTreeMap<String, serde_json::Value>,
    headers: HashMap<String, String>,
    encoding: ParameterEncoding,
    progress_handler: Option<ProgressHandler>,
    multipart_form_data: Option<MultipartFormData>,
}

impl ApiRequest {
    /// Creates a request for the given method and path.
    #[must_use]
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            ..Default::default()
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Creates a POST request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replaces all parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: BTreeMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the parameter encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: ParameterEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the progress handler.
    #[must_use]
    pub fn with_progress_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the multipart form data.
    #[must_use]
    pub fn with_multipart_form_data(mut self, form: MultipartFormData) -> Self {
        self.multipart_form_data = Some(form);
        self
    }

    /// The request path, relative to the base URL or absolute.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The HTTP method.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The request parameters.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.parameters
    }

    /// The request headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The parameter encoding.
    #[must_use]
    pub fn encoding(&self) -> ParameterEncoding {
        self.encoding
    }

    /// The progress handler, if any.
    #[must_use]
    pub fn progress_handler(&self) -> Option<&ProgressHandler> {
        self.progress_handler.as_ref()
    }

    /// The multipart form data, if any.
    #[must_use]
    pub fn multipart_form_data(&self) -> Option<&MultipartFormData> {
        self.multipart_form_data.as_ref()
    }

    /// Flattens parameters into string pairs for query or form encoding.
    ///
    /// Strings are used verbatim; other values use their JSON text.
    #[must_use]
    pub fn parameter_pairs(&self) -> Vec<(String, String)> {
        flatten_parameters(&self.parameters)
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("parameters", &self.parameters)
            .field("headers", &self.headers)
            .field("encoding", &self.encoding)
            .field("has_progress_handler", &self.progress_handler.is_some())
            .field("multipart_form_data", &self.multipart_form_data)
            .finish()
    }
}

pub(crate) fn flatten_parameters(
    parameters: &BTreeMap<String, serde_json::Value>,
) -> Vec<(String, String)> {
    parameters
        .iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

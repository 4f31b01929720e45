//! Configuration for executors and the default transport.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ConfigError;

/// Configuration for a [`RequestExecutor`](crate::executor::RequestExecutor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL requests are resolved against.
    pub base_url: String,
    /// Headers sent with every request. Per-request headers win.
    #[serde(default)]
    pub default_headers: HashMap<String, String>,
    /// Settings for the default transport.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl ExecutorConfig {
    /// Creates a configuration for the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HashMap::new(),
            transport: TransportConfig::default(),
        }
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Adds a default header.
    #[must_use]
    pub fn with_default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    /// Sets the transport configuration.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Checks the base URL and transport settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base_url.trim();
        let has_scheme = base.starts_with("http://") || base.starts_with("https://");
        let has_host = base
            .split_once("://")
            .is_some_and(|(_, rest)| !rest.trim_matches('/').is_empty());
        if !has_scheme || !has_host {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        self.transport.validate()
    }

    /// The base URL without trailing slashes.
    #[must_use]
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }
}

/// Configuration for [`ReqwestTransport`](crate::transport::ReqwestTransport).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Report 4xx and 5xx responses as transport errors coded with the status.
    #[serde(default)]
    pub error_for_status: bool,
}

fn default_timeout() -> f64 {
    60.0
}

fn default_connect_timeout() -> f64 {
    10.0
}

fn default_user_agent() -> String {
    concat!("courier/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            user_agent: default_user_agent(),
            error_for_status: false,
        }
    }
}

impl TransportConfig {
    /// Creates a transport configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, seconds: f64) -> Self {
        self.connect_timeout_seconds = seconds;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Reports HTTP error statuses as transport errors.
    #[must_use]
    pub fn with_error_for_status(mut self, enabled: bool) -> Self {
        self.error_for_status = enabled;
        self
    }

    /// Gets the request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    /// Gets the connect timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_seconds)
    }

    /// Checks that timeouts are positive and finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("timeout_seconds", self.timeout_seconds)?;
        check_seconds("connect_timeout_seconds", self.connect_timeout_seconds)
    }
}

fn check_seconds(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            reason: format!("expected a positive number of seconds, got {value}"),
        })
    }
}

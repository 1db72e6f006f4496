//! Oracle client configuration.

use std::time::Duration;

/// Default oracle location.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:6000";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of extra attempts after a transport error.
pub const DEFAULT_RETRIES: u32 = 1;

/// Configuration for the HTTP oracle client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleConfig {
    /// Base URL, e.g. "http://127.0.0.1:6000"
    pub base_url: String,
    /// Whole-request timeout
    pub timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Extra attempts after a transport error (never after a status)
    pub retries: u32,
}

impl OracleConfig {
    /// Configuration for `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the whole-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Base URL without a trailing slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }
}

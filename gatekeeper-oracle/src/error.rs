//! Oracle client errors.
//!
//! None of these reach a gate caller: the gatekeeper folds every variant into
//! an unavailable oracle signal before fusion.

use thiserror::Error;

/// Errors from talking to the anomaly oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// No response within the request timeout.
    #[error("oracle timed out")]
    Timeout,

    /// The oracle answered with a non-2xx status.
    #[error("oracle returned status {0}")]
    Status(u16),

    /// Connection or protocol failure before a status was received.
    #[error("oracle transport error: {0}")]
    Transport(String),

    /// The body was not a usable score.
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),

    /// The client could not be built from its configuration.
    #[error("oracle configuration error: {0}")]
    Config(String),
}

impl OracleError {
    /// Only transport failures are retried. A timeout has already spent the
    /// latency budget and a non-2xx answer will not change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

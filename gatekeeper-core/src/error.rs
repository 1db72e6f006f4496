//! Gate errors.
//!
//! Only protocol misuse and malformed input are errors. A file that looks bad
//! is not an error: it is an assessment with a high criticality level. An
//! unreachable oracle is not an error either once it reaches the fusion step.

use thiserror::Error;

use crate::wire::ErrorCode;

/// All errors surfaced to callers of the gate.
///
/// Each variant maps to a stable wire code (see [`GateError::code`]).
/// Display strings are deliberately terse and never carry key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    /// Client public value is not a usable X25519 point.
    #[error("invalid key material")]
    InvalidKeyMaterial,

    /// No handshake session with this id.
    #[error("session not found")]
    SessionNotFound,

    /// The handshake session timed out before validation.
    #[error("session expired")]
    SessionExpired,

    /// The handshake session is not in a state that allows this call.
    #[error("invalid session state")]
    InvalidSessionState,

    /// No bytes to classify.
    #[error("empty input")]
    EmptyInput,

    /// Request frame violates the wire format.
    #[error("malformed frame")]
    MalformedFrame,

    /// Internal error (should never happen).
    #[error("internal error")]
    InternalError,
}

impl GateError {
    /// Stable one-byte code carried in ERROR responses.
    pub fn code(self) -> u8 {
        ErrorCode::from(self).to_byte()
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Protocol misuse and malformed input never succeed on retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::InternalError)
    }
}

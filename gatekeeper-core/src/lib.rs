//! Gatekeeper Core
//!
//! Pure decision logic for the gatekeeper: no I/O, no logging, no clocks
//! other than the `Instant`s callers pass in.
//!
//! This crate provides:
//! - X25519 + HKDF handshake key material and the handshake state machine
//! - A local file risk classifier (signatures, structure, entropy, padding)
//! - Fusion of the local signal with an anomaly oracle signal
//! - The wire codec shared by the server and the CLI
//!
//! # Invariants
//!
//! - A handshake session leaves PENDING at most once
//! - Server secrets never leave this crate and are zeroized on drop
//! - A file that looks bad is an assessment, never an error
//! - An unavailable oracle is replaced by a conservative floor, never skipped
//! - Direct use of `unsafe` is forbidden (#![forbid(unsafe_code)])

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod classifier;
pub mod entropy;
pub mod error;
pub mod fusion;
pub mod keys;
pub mod pattern;
pub mod report;
pub mod signature;
pub mod state;
pub mod structure;
pub mod wire;

pub use classifier::{classify, Criticality, FileRiskAssessment};
pub use error::GateError;
pub use fusion::{fuse, FusionPolicy, FusionVerdict, LocalSignal, OracleSignal, Outcome, Severity, Verdict};
pub use keys::{HandshakeId, SessionKey};
pub use report::{FileReport, HandshakeReport};
pub use signature::FileType;
pub use state::{HandshakeSession, HandshakeState};
pub use wire::{ErrorCode, Request, Response};

//! Gatekeeper Oracle
//!
//! Client for the external anomaly-scoring service.
//!
//! The oracle is advisory. Every failure (timeout, transport error, non-2xx
//! status, unusable body) comes back as an [`OracleError`], which the gate
//! folds into an unavailable signal with [`into_signal`]. Nothing here blocks
//! a decision.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod client;
pub mod config;
pub mod error;
pub mod features;

pub use client::{into_signal, AnomalyOracle, HttpOracle, OracleHealth, OracleScore};
pub use config::OracleConfig;
pub use error::OracleError;
pub use features::{FileContext, FileFeatures, HandshakeContext, HandshakeFeatures};

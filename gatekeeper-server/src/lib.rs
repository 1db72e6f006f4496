//! Gatekeeper Server
//!
//! Holds handshake sessions, runs decisions through the oracle and fusion,
//! fans out side effects and serves the gate over WebSocket.
//!
//! - [`store`]: the session table and its sweeper
//! - [`gate`]: handshake init/validate and upload decisions
//! - [`sinks`]: audit events, alerts and artifact persistence
//! - [`server`]: the WebSocket front end

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod config;
pub mod gate;
pub mod server;
pub mod sinks;
pub mod store;

pub use config::{ConfigError, ServerConfig};
pub use gate::{Gatekeeper, HandshakeOutcome, HandshakeStarted, Sinks, Upload};
pub use server::{handle_message, run_server, Limits};
pub use sinks::{
    AlertRecord, AlertSink, ArtifactStore, AuditEvent, AuditSink, DirectoryStore, MemorySink,
    ThreatType, TracingSink, TransferRecord,
};
pub use store::{SessionStore, SweepStats};

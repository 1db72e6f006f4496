//! Server configuration.
//!
//! Defaults overlaid with `GATEKEEPER_*` environment variables. A variable
//! that is set but malformed is an error, never a silent default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use gatekeeper_core::FusionPolicy;
use gatekeeper_oracle::OracleConfig;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
/// Default handshake lifetime.
pub const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(30);
/// Default retention of terminal sessions before purge.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);
/// Default sweeper period.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// Default concurrent connections per source IP.
pub const DEFAULT_MAX_CONN_PER_IP: usize = 5;
/// Default upload size limit.
pub const DEFAULT_MAX_UPLOAD: usize = 32 * 1024 * 1024;
/// Default artifact encryption label.
pub const DEFAULT_ENCRYPTION_LABEL: &str = "none";
/// Default artifact directory.
pub const DEFAULT_ARTIFACT_DIR: &str = "artifacts";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("{name}: invalid value {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
    /// Values parse but contradict each other.
    #[error("{0}")]
    Inconsistent(String),
}

/// Full server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Oracle client settings
    pub oracle: OracleConfig,
    /// PENDING → EXPIRED after this long
    pub handshake_ttl: Duration,
    /// Terminal sessions are purged after this long
    pub retention: Duration,
    /// Sweeper period
    pub sweep_interval: Duration,
    /// Fusion threshold and floor
    pub policy: FusionPolicy,
    /// Concurrent connections per source IP
    pub max_conn_per_ip: usize,
    /// Largest accepted WebSocket message
    pub max_upload: usize,
    /// Encryption method recorded on artifacts
    pub encryption_label: String,
    /// Where accepted uploads are written
    pub artifact_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            oracle: OracleConfig::default(),
            handshake_ttl: DEFAULT_HANDSHAKE_TTL,
            retention: DEFAULT_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            policy: FusionPolicy::default(),
            max_conn_per_ip: DEFAULT_MAX_CONN_PER_IP,
            max_upload: DEFAULT_MAX_UPLOAD,
            encryption_label: DEFAULT_ENCRYPTION_LABEL.to_string(),
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Env { lookup: &lookup };

        if let Some(bind) = env.parse::<SocketAddr>("GATEKEEPER_BIND")? {
            config.bind = bind;
        }
        if let Some(url) = lookup("GATEKEEPER_ORACLE_URL") {
            config.oracle.base_url = url;
        }
        if let Some(ms) = env.parse::<u64>("GATEKEEPER_ORACLE_TIMEOUT_MS")? {
            config.oracle.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = env.parse::<u32>("GATEKEEPER_ORACLE_RETRIES")? {
            config.oracle.retries = retries;
        }
        if let Some(secs) = env.parse::<u64>("GATEKEEPER_HANDSHAKE_TTL_SECS")? {
            config.handshake_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("GATEKEEPER_RETENTION_SECS")? {
            config.retention = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("GATEKEEPER_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(t) = env.parse::<f64>("GATEKEEPER_ACCEPTANCE_THRESHOLD")? {
            config.policy.acceptance_threshold = t;
        }
        if let Some(f) = env.parse::<f64>("GATEKEEPER_CONSERVATIVE_FLOOR")? {
            config.policy.conservative_floor = f;
        }
        if let Some(n) = env.parse::<usize>("GATEKEEPER_MAX_CONN_PER_IP")? {
            config.max_conn_per_ip = n;
        }
        if let Some(n) = env.parse::<usize>("GATEKEEPER_MAX_UPLOAD_BYTES")? {
            config.max_upload = n;
        }
        if let Some(label) = lookup("GATEKEEPER_ENCRYPTION_LABEL") {
            config.encryption_label = label;
        }
        if let Some(dir) = lookup("GATEKEEPER_ARTIFACT_DIR") {
            config.artifact_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.policy.acceptance_threshold) {
            return Err(ConfigError::Inconsistent(
                "acceptance threshold must be within [0, 1]".into(),
            ));
        }
        if !(self.policy.conservative_floor > 0.0 && self.policy.conservative_floor <= 1.0) {
            return Err(ConfigError::Inconsistent(
                "conservative floor must be within (0, 1]".into(),
            ));
        }
        if self.handshake_ttl.is_zero() || self.sweep_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "handshake ttl and sweep interval must be non-zero".into(),
            ));
        }
        if self.retention.is_zero() {
            return Err(ConfigError::Inconsistent(
                "session retention must be non-zero".into(),
            ));
        }
        if self.max_conn_per_ip == 0 || self.max_upload == 0 {
            return Err(ConfigError::Inconsistent(
                "connection and upload limits must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        match (self.lookup)(name) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}

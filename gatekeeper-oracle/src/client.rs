//! Anomaly oracle client.
//!
//! The gate only depends on [`AnomalyOracle`]. [`HttpOracle`] talks to the
//! scoring service over HTTP; tests plug in static doubles.

use async_trait::async_trait;
use gatekeeper_core::{OracleSignal, Verdict};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::features::{FileFeatures, HandshakeFeatures};

/// A score returned by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct OracleScore {
    /// Anomaly score in [0, 1].
    pub anomaly_score: f64,
    /// Oracle's own label.
    pub verdict: Verdict,
    /// Model confidence, when reported.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl OracleScore {
    /// Reject scores that cannot be fused.
    pub fn validate(self) -> Result<Self, OracleError> {
        if !self.anomaly_score.is_finite() || !(0.0..=1.0).contains(&self.anomaly_score) {
            return Err(OracleError::InvalidResponse(format!(
                "anomaly_score {} outside [0, 1]",
                self.anomaly_score
            )));
        }
        Ok(self)
    }
}

/// Oracle health report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OracleHealth {
    /// "healthy" when the service is up.
    pub status: String,
    /// Whether scoring models are loaded.
    #[serde(default)]
    pub models_loaded: bool,
}

impl OracleHealth {
    /// Up and able to score.
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.models_loaded
    }
}

/// External anomaly-scoring service.
#[async_trait]
pub trait AnomalyOracle: Send + Sync {
    /// Score a handshake feature record.
    async fn score_handshake(&self, features: &HandshakeFeatures)
        -> Result<OracleScore, OracleError>;

    /// Score a file feature record.
    async fn score_file(&self, features: &FileFeatures) -> Result<OracleScore, OracleError>;

    /// Service health.
    async fn health(&self) -> Result<OracleHealth, OracleError>;

    /// Name for logs.
    fn name(&self) -> &str;
}

/// Fold an oracle result into the signal used by fusion.
pub fn into_signal(result: Result<OracleScore, OracleError>) -> OracleSignal {
    match result {
        Ok(score) => OracleSignal::Scored {
            anomaly_score: score.anomaly_score,
            verdict: score.verdict,
        },
        Err(err) => OracleSignal::Unavailable {
            reason: err.to_string(),
        },
    }
}

/// HTTP client for the scoring service.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    config: OracleConfig,
    client: reqwest::Client,
}

impl HttpOracle {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// [`OracleError::Config`] for a non-HTTP base URL or a client build failure.
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(OracleError::Config(format!(
                "base url must be http(s): {}",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| OracleError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Client configuration.
    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    async fn post_score<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<OracleScore, OracleError> {
        let url = self.config.endpoint(path);
        let mut attempt = 0u32;
        loop {
            match self.post_once::<T, OracleScore>(&url, body).await {
                Ok(score) => {
                    let score = score.validate()?;
                    debug!(
                        path,
                        anomaly_score = score.anomaly_score,
                        verdict = ?score.verdict,
                        "oracle scored"
                    );
                    return Ok(score);
                }
                Err(err) if err.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(path, attempt, error = %err, "oracle transport error, retrying");
                }
                Err(err) => {
                    warn!(path, error = %err, "oracle unavailable");
                    return Err(err);
                }
            }
        }
    }

    async fn post_once<T: Serialize + Sync, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<R, OracleError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AnomalyOracle for HttpOracle {
    async fn score_handshake(
        &self,
        features: &HandshakeFeatures,
    ) -> Result<OracleScore, OracleError> {
        self.post_score("/predict/handshake", features).await
    }

    async fn score_file(&self, features: &FileFeatures) -> Result<OracleScore, OracleError> {
        self.post_score("/predict/file", features).await
    }

    async fn health(&self) -> Result<OracleHealth, OracleError> {
        let response = self
            .client
            .get(self.config.endpoint("/health"))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        let ok = OracleScore {
            anomaly_score: 1.0,
            verdict: Verdict::Suspicious,
            confidence: None,
        };
        assert!(ok.validate().is_ok());

        for bad in [1.5, -0.1, f64::NAN, f64::INFINITY] {
            let score = OracleScore {
                anomaly_score: bad,
                verdict: Verdict::Normal,
                confidence: None,
            };
            assert!(matches!(score.validate(), Err(OracleError::InvalidResponse(_))));
        }
    }

    #[test]
    fn test_into_signal() {
        let signal = into_signal(Err(OracleError::Timeout));
        assert_eq!(
            signal,
            OracleSignal::Unavailable {
                reason: "oracle timed out".to_string()
            }
        );
        let signal = into_signal(Ok(OracleScore {
            anomaly_score: 0.2,
            verdict: Verdict::Normal,
            confidence: Some(0.8),
        }));
        assert!(signal.is_available());
    }

    #[test]
    fn test_rejects_non_http_url() {
        let res = HttpOracle::new(OracleConfig::new("ftp://oracle"));
        assert!(matches!(res, Err(OracleError::Config(_))));
    }

    #[test]
    fn test_health_parse() {
        let health: OracleHealth =
            serde_json::from_str(r#"{"status":"healthy","models_loaded":false}"#).unwrap();
        assert!(!health.is_healthy());
    }
}

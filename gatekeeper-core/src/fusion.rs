//! Decision fusion.
//!
//! Merges a local risk signal with the oracle signal into one outcome.
//! Pure: identical inputs always give an identical verdict. No retries here.
//!
//! REJECT when any one of these holds:
//! - the combined score reaches the acceptance threshold
//! - the local criticality level is 2 or more
//! - the oracle's own verdict is "suspicious"

use serde::{Deserialize, Serialize};

use crate::classifier::{Criticality, FileRiskAssessment};

/// Default combined score at which a call is rejected.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.7;

/// Default score assumed when the oracle could not be consulted.
pub const DEFAULT_CONSERVATIVE_FLOOR: f64 = 0.5;

/// Oracle verdict label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Looks like normal traffic.
    Normal,
    /// Flagged by the oracle.
    Suspicious,
}

/// What the oracle said, or that it could not be asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OracleSignal {
    /// The oracle answered.
    Scored {
        /// Anomaly score in [0, 1].
        anomaly_score: f64,
        /// Oracle's own label.
        verdict: Verdict,
    },
    /// Timeout, transport error, non-2xx or unusable body.
    Unavailable {
        /// Short description of the failure.
        reason: String,
    },
}

impl OracleSignal {
    /// Whether the oracle answered.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Scored { .. })
    }
}

/// Fixed fusion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionPolicy {
    /// Combined score at or above which the call is rejected.
    pub acceptance_threshold: f64,
    /// Score assumed for an unavailable oracle. Must be non-zero.
    pub conservative_floor: f64,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            conservative_floor: DEFAULT_CONSERVATIVE_FLOOR,
        }
    }
}

/// Local, deterministic side of the decision.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSignal {
    /// Local risk proxy in [0, 1].
    pub proxy: f64,
    /// File criticality level; `None` for handshakes.
    pub criticality: Option<Criticality>,
    /// Local findings, carried into the reason codes.
    pub issues: Vec<String>,
}

impl LocalSignal {
    /// Local signal for an upload.
    pub fn from_assessment(assessment: &FileRiskAssessment) -> Self {
        Self {
            proxy: assessment.local_proxy(),
            criticality: Some(assessment.criticality_level),
            issues: assessment.issues.clone(),
        }
    }

    /// Local signal for a handshake.
    ///
    /// A bad confirmation signature saturates the proxy. Otherwise the proxy is
    /// half the origin's distrust (`1 - reputation`).
    pub fn handshake(signature_valid: bool, reputation: f64) -> Self {
        if !signature_valid {
            return Self {
                proxy: 1.0,
                criticality: None,
                issues: vec!["invalid_signature".to_string()],
            };
        }
        Self {
            proxy: ((1.0 - reputation.clamp(0.0, 1.0)) * 0.5).clamp(0.0, 1.0),
            criticality: None,
            issues: Vec::new(),
        }
    }
}

/// Fused outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    /// Persist the artifact or release the key.
    Accept,
    /// Record an alert; persist and release nothing.
    Reject,
}

/// Alert severity derived from the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Below 0.4.
    Low,
    /// 0.4 and above.
    Medium,
    /// 0.7 and above.
    High,
    /// 0.9 and above.
    Critical,
}

impl Severity {
    /// Severity bucket for a combined score.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.9 => Self::Critical,
            s if s >= 0.7 => Self::High,
            s if s >= 0.4 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Result of one fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionVerdict {
    /// ACCEPT or REJECT.
    pub outcome: Outcome,
    /// `max(local proxy, oracle score or conservative floor)`.
    pub combined_score: f64,
    /// Severity bucket of `combined_score`.
    pub severity: Severity,
    /// Local issues followed by decision flags.
    pub reason_codes: Vec<String>,
    /// False when the conservative floor stood in for the oracle.
    pub oracle_available: bool,
}

impl FusionVerdict {
    /// Whether the outcome is ACCEPT.
    pub fn is_accept(&self) -> bool {
        self.outcome == Outcome::Accept
    }
}

/// Fuse the local and oracle signals.
pub fn fuse(local: &LocalSignal, oracle: &OracleSignal, policy: &FusionPolicy) -> FusionVerdict {
    let local_proxy = local.proxy.clamp(0.0, 1.0);
    let (oracle_score, oracle_suspicious) = match oracle {
        OracleSignal::Scored {
            anomaly_score,
            verdict,
        } => (anomaly_score.clamp(0.0, 1.0), *verdict == Verdict::Suspicious),
        OracleSignal::Unavailable { .. } => (policy.conservative_floor, false),
    };
    let combined_score = local_proxy.max(oracle_score);

    let mut reason_codes = local.issues.clone();
    let over_threshold = combined_score >= policy.acceptance_threshold;
    if over_threshold {
        reason_codes.push("score_above_threshold".to_string());
    }
    let critical_locally = local
        .criticality
        .is_some_and(|level| level >= Criticality::HIGH);
    if let Some(level) = local.criticality.filter(|_| critical_locally) {
        reason_codes.push(format!("criticality_level_{}", level));
    }
    if oracle_suspicious {
        reason_codes.push("oracle_suspicious".to_string());
    }
    if !oracle.is_available() {
        reason_codes.push("oracle_unavailable".to_string());
    }

    let outcome = if over_threshold || critical_locally || oracle_suspicious {
        Outcome::Reject
    } else {
        Outcome::Accept
    };

    FusionVerdict {
        outcome,
        combined_score,
        severity: Severity::from_score(combined_score),
        reason_codes,
        oracle_available: oracle.is_available(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(score: f64, verdict: Verdict) -> OracleSignal {
        OracleSignal::Scored {
            anomaly_score: score,
            verdict,
        }
    }

    fn unavailable() -> OracleSignal {
        OracleSignal::Unavailable {
            reason: "timeout".to_string(),
        }
    }

    fn file_signal(level: Criticality) -> LocalSignal {
        LocalSignal {
            proxy: level.proxy(),
            criticality: Some(level),
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_clean_file_normal_oracle_accepts() {
        let v = fuse(
            &file_signal(Criticality::SAFE),
            &scored(0.1, Verdict::Normal),
            &FusionPolicy::default(),
        );
        assert_eq!(v.outcome, Outcome::Accept);
        assert_eq!(v.combined_score, 0.1);
        assert!(v.reason_codes.is_empty());
        assert_eq!(v.severity, Severity::Low);
    }

    #[test]
    fn test_level_two_rejects_regardless_of_oracle() {
        let v = fuse(
            &file_signal(Criticality::HIGH),
            &scored(0.0, Verdict::Normal),
            &FusionPolicy::default(),
        );
        assert_eq!(v.outcome, Outcome::Reject);
        assert_eq!(v.combined_score, 0.5);
        assert!(v.reason_codes.contains(&"criticality_level_2".to_string()));
    }

    #[test]
    fn test_oracle_suspicious_alone_rejects() {
        let v = fuse(
            &file_signal(Criticality::SAFE),
            &scored(0.2, Verdict::Suspicious),
            &FusionPolicy::default(),
        );
        assert_eq!(v.outcome, Outcome::Reject);
        assert_eq!(v.reason_codes, vec!["oracle_suspicious".to_string()]);
    }

    #[test]
    fn test_score_threshold_alone_rejects() {
        let v = fuse(
            &file_signal(Criticality::SAFE),
            &scored(0.7, Verdict::Normal),
            &FusionPolicy::default(),
        );
        assert_eq!(v.outcome, Outcome::Reject);
        assert!(v.reason_codes.contains(&"score_above_threshold".to_string()));
    }

    #[test]
    fn test_unavailable_oracle_uses_floor() {
        let policy = FusionPolicy::default();
        let v = fuse(&file_signal(Criticality::SAFE), &unavailable(), &policy);
        assert!(v.combined_score >= policy.conservative_floor);
        assert!(!v.oracle_available);
        assert!(v.reason_codes.contains(&"oracle_unavailable".to_string()));
        // floor below threshold: elevated, not an automatic rejection
        assert_eq!(v.outcome, Outcome::Accept);
    }

    #[test]
    fn test_floor_above_threshold_flips_to_reject() {
        let policy = FusionPolicy {
            acceptance_threshold: 0.7,
            conservative_floor: 0.8,
        };
        let local = file_signal(Criticality::SAFE);
        let reachable = fuse(&local, &scored(0.0, Verdict::Normal), &policy);
        let unreachable = fuse(&local, &unavailable(), &policy);
        assert_eq!(reachable.outcome, Outcome::Accept);
        assert_eq!(unreachable.outcome, Outcome::Reject);
        assert_eq!(unreachable.combined_score, 0.8);
    }

    #[test]
    fn test_floor_never_lowers_local_risk() {
        let v = fuse(
            &file_signal(Criticality::CRITICAL),
            &unavailable(),
            &FusionPolicy::default(),
        );
        assert_eq!(v.combined_score, 1.0);
        assert_eq!(v.severity, Severity::Critical);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let local = LocalSignal {
            proxy: 0.25,
            criticality: Some(Criticality::ELEVATED),
            issues: vec!["null-byte flooding".to_string()],
        };
        let oracle = scored(0.33, Verdict::Normal);
        let policy = FusionPolicy::default();
        assert_eq!(fuse(&local, &oracle, &policy), fuse(&local, &oracle, &policy));
    }

    #[test]
    fn test_handshake_signal() {
        let good = LocalSignal::handshake(true, 0.5);
        assert_eq!(good.proxy, 0.25);
        assert!(good.criticality.is_none());

        let bad = LocalSignal::handshake(false, 1.0);
        assert_eq!(bad.proxy, 1.0);
        let v = fuse(&bad, &scored(0.0, Verdict::Normal), &FusionPolicy::default());
        assert_eq!(v.outcome, Outcome::Reject);
        assert_eq!(v.reason_codes[0], "invalid_signature");
    }

    #[test]
    fn test_out_of_range_scores_clamped() {
        let v = fuse(
            &file_signal(Criticality::SAFE),
            &scored(3.0, Verdict::Normal),
            &FusionPolicy::default(),
        );
        assert_eq!(v.combined_score, 1.0);
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(Severity::from_score(0.39), Severity::Low);
        assert_eq!(Severity::from_score(0.4), Severity::Medium);
        assert_eq!(Severity::from_score(0.7), Severity::High);
        assert_eq!(Severity::from_score(0.95), Severity::Critical);
    }

    #[test]
    fn test_signal_serialization() {
        let json = serde_json::to_value(scored(0.1, Verdict::Normal)).unwrap();
        assert_eq!(json["status"], "scored");
        assert_eq!(json["verdict"], "normal");
        let json = serde_json::to_value(Outcome::Reject).unwrap();
        assert_eq!(json, "REJECT");
    }
}

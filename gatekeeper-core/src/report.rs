//! Decision reports returned to callers.
//!
//! These carry the decision, the reason codes and the oracle result. They
//! never carry key material beyond a truncated fingerprint.

use serde::{Deserialize, Serialize};

use crate::classifier::FileRiskAssessment;
use crate::fusion::{FusionVerdict, OracleSignal, Outcome, Severity};
use crate::keys::HandshakeId;

/// Result of a handshake validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReport {
    /// Handshake this report belongs to.
    pub handshake_id: HandshakeId,
    /// ACCEPT releases the key, REJECT withholds it.
    pub outcome: Outcome,
    /// False only when a confirmation signature was sent and did not verify.
    pub signature_valid: bool,
    /// Fused score in [0, 1].
    pub combined_score: f64,
    /// Severity bucket of the combined score.
    pub severity: Severity,
    /// Machine-readable reasons, in evaluation order.
    pub reason_codes: Vec<String>,
    /// What the anomaly oracle said, or why it could not be asked.
    pub oracle: OracleSignal,
    /// Truncated hash of the released key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
    /// Alert raised for a rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
}

impl HandshakeReport {
    /// Report for a fused verdict. Side-effect ids are filled in later.
    pub fn new(
        handshake_id: HandshakeId,
        verdict: FusionVerdict,
        signature_valid: bool,
        oracle: OracleSignal,
    ) -> Self {
        Self {
            handshake_id,
            outcome: verdict.outcome,
            signature_valid,
            combined_score: verdict.combined_score,
            severity: verdict.severity,
            reason_codes: verdict.reason_codes,
            oracle,
            key_fingerprint: None,
            alert_id: None,
        }
    }
}

/// Result of a file classification and decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    /// ACCEPT or REJECT.
    pub outcome: Outcome,
    /// Fused score in [0, 1].
    pub combined_score: f64,
    /// Severity bucket of the combined score.
    pub severity: Severity,
    /// Local issues followed by fusion reasons.
    pub reason_codes: Vec<String>,
    /// Local classifier output.
    pub assessment: FileRiskAssessment,
    /// What the anomaly oracle said, or why it could not be asked.
    pub oracle: OracleSignal,
    /// Id of the stored artifact, on ACCEPT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    /// Id of the raised alert, on REJECT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
}

impl FileReport {
    /// Report for a fused verdict. Side-effect ids are filled in later.
    pub fn new(
        verdict: FusionVerdict,
        assessment: FileRiskAssessment,
        oracle: OracleSignal,
    ) -> Self {
        Self {
            outcome: verdict.outcome,
            combined_score: verdict.combined_score,
            severity: verdict.severity,
            reason_codes: verdict.reason_codes,
            assessment,
            oracle,
            transfer_id: None,
            alert_id: None,
        }
    }

    /// Whether the file was accepted.
    pub fn is_accept(&self) -> bool {
        self.outcome == Outcome::Accept
    }
}

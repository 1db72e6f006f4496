//! The gatekeeper: handshake init/validate and upload decisions.
//!
//! Each decision ends in exactly one side effect. A handshake ACCEPT releases
//! the key to the caller and a file ACCEPT persists one artifact. Every
//! REJECT raises one alert. Every handshake attempt also emits one audit event.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Timelike, Utc};
use gatekeeper_core::keys::KEY_LEN;
use gatekeeper_core::{
    classify, fuse, FileReport, FileRiskAssessment, FusionPolicy, FusionVerdict, GateError,
    HandshakeId, HandshakeReport, LocalSignal, Outcome, SessionKey,
};
use gatekeeper_oracle::features::{
    DEFAULT_GEOLOCATION_RISK, DEFAULT_IP_REPUTATION, DEFAULT_RETRY_COUNT,
};
use gatekeeper_oracle::{
    into_signal, AnomalyOracle, FileContext, FileFeatures, HandshakeContext, HandshakeFeatures,
};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::sinks::{
    digest, AlertDetails, AlertRecord, AlertSink, ArtifactStore, AuditEvent, AuditSink,
    MemorySink, ThreatType, TransferRecord,
};
use crate::store::SessionStore;

/// Response to a successful init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeStarted {
    /// New handshake id.
    pub handshake_id: HandshakeId,
    /// Ephemeral server public value.
    pub server_public: [u8; KEY_LEN],
}

/// Outcome of a validate call that got past the state checks.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Key released. This is the only copy the server hands out.
    Accepted {
        /// The session key.
        session_key: SessionKey,
        /// Decision details.
        report: HandshakeReport,
    },
    /// Key withheld and erased.
    Suspicious(HandshakeReport),
}

/// One upload as received.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// File bytes.
    pub data: Vec<u8>,
    /// Filename, if sent.
    pub filename: Option<String>,
    /// Claimed MIME type, if sent.
    pub claimed_type: Option<String>,
    /// Time spent receiving the bytes.
    pub upload_duration: Duration,
}

/// Where side effects go.
#[derive(Clone)]
pub struct Sinks {
    /// Connection events.
    pub audit: Arc<dyn AuditSink>,
    /// Alerts.
    pub alerts: Arc<dyn AlertSink>,
    /// Accepted uploads.
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl Sinks {
    /// All three kinds into one in-memory sink.
    pub fn memory(sink: Arc<MemorySink>) -> Self {
        Self {
            audit: sink.clone(),
            alerts: sink.clone(),
            artifacts: sink,
        }
    }
}

/// Handshake and upload gate.
pub struct Gatekeeper {
    store: Arc<SessionStore>,
    oracle: Arc<dyn AnomalyOracle>,
    sinks: Sinks,
    policy: FusionPolicy,
    encryption_label: String,
    uploads_in_flight: AtomicU32,
}

impl Gatekeeper {
    /// Gate with a fresh session store.
    pub fn new(config: &ServerConfig, oracle: Arc<dyn AnomalyOracle>, sinks: Sinks) -> Self {
        Self {
            store: Arc::new(SessionStore::new(config.handshake_ttl, config.retention)),
            oracle,
            sinks,
            policy: config.policy,
            encryption_label: config.encryption_label.clone(),
            uploads_in_flight: AtomicU32::new(0),
        }
    }

    /// The session store, for the sweeper.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Fusion parameters in use.
    pub fn policy(&self) -> FusionPolicy {
        self.policy
    }

    /// Start a handshake.
    ///
    /// # Errors
    ///
    /// [`GateError::InvalidKeyMaterial`]; no session is created.
    pub async fn handshake_init(
        &self,
        client_public: &[u8],
        origin: &str,
    ) -> Result<HandshakeStarted, GateError> {
        match self.store.open(client_public, Instant::now()) {
            Ok((handshake_id, server_public)) => {
                info!(handshake_id = %handshake_id, origin, "handshake started");
                self.audit("pending", Some(handshake_id), origin, "handshake initiated")
                    .await;
                Ok(HandshakeStarted {
                    handshake_id,
                    server_public,
                })
            }
            Err(err) => {
                debug!(origin, error = %err, "handshake init rejected");
                self.audit("rejected", None, origin, format!("init: {}", err))
                    .await;
                Err(err)
            }
        }
    }

    /// Validate a pending handshake, optionally with a confirmation signature.
    ///
    /// # Errors
    ///
    /// Protocol misuse only: [`GateError::SessionNotFound`],
    /// [`GateError::SessionExpired`], [`GateError::InvalidSessionState`].
    /// A rejected handshake is [`HandshakeOutcome::Suspicious`], not an error.
    pub async fn handshake_validate(
        &self,
        handshake_id: HandshakeId,
        signature: Option<&[u8]>,
        origin: &str,
    ) -> Result<HandshakeOutcome, GateError> {
        let claim = match self.store.claim(&handshake_id, Instant::now()) {
            Ok(claim) => claim,
            Err(err) => {
                debug!(handshake_id = %handshake_id, error = %err, "validate refused");
                self.audit("rejected", Some(handshake_id), origin, format!("validate: {}", err))
                    .await;
                return Err(err);
            }
        };

        let mut context = HandshakeContext {
            duration: claim.elapsed,
            client_public: claim.client_public(),
            server_public: claim.server_public(),
            signature_valid: true,
            retry_count: DEFAULT_RETRY_COUNT,
            timestamp_hour: Utc::now().hour(),
            ip_reputation: DEFAULT_IP_REPUTATION,
            geolocation_risk: DEFAULT_GEOLOCATION_RISK,
        };

        let session_key = match claim.derive() {
            Ok(key) => key,
            Err(err) => {
                self.store.fail(&handshake_id, Instant::now());
                warn!(handshake_id = %handshake_id, error = %err, "key derivation failed");
                self.audit("failed", Some(handshake_id), origin, format!("derive: {}", err))
                    .await;
                return Err(err);
            }
        };
        if let Some(tag) = signature {
            context.signature_valid = session_key.verify_confirmation(&handshake_id, tag);
        }

        // no store lock is held here
        let features = HandshakeFeatures::from_context(&context);
        let oracle = into_signal(self.oracle.score_handshake(&features).await);
        let local = LocalSignal::handshake(context.signature_valid, context.ip_reputation);
        let mut verdict = fuse(&local, &oracle, &self.policy);

        // the sweeper may have failed the session while the oracle was scoring
        let completed = if verdict.is_accept() {
            match self.store.complete(&handshake_id, &session_key, Instant::now()) {
                Ok(()) => true,
                Err(err) => {
                    warn!(handshake_id = %handshake_id, error = %err, "accepted session lost");
                    verdict.outcome = Outcome::Reject;
                    verdict.reason_codes.push("session_lost".to_string());
                    false
                }
            }
        } else {
            false
        };

        let mut report =
            HandshakeReport::new(handshake_id, verdict.clone(), context.signature_valid, oracle);

        if completed {
            let fingerprint = session_key.fingerprint();
            info!(
                handshake_id = %handshake_id,
                fingerprint = %fingerprint,
                score = verdict.combined_score,
                oracle = self.oracle.name(),
                oracle_available = verdict.oracle_available,
                "handshake validated"
            );
            report.key_fingerprint = Some(fingerprint.clone());
            self.audit(
                "validated",
                Some(handshake_id),
                origin,
                format!("key {} released, score {:.3}", fingerprint, verdict.combined_score),
            )
            .await;
            return Ok(HandshakeOutcome::Accepted {
                session_key,
                report,
            });
        }

        self.store.fail(&handshake_id, Instant::now());
        drop(session_key);
        let threat = if context.signature_valid {
            ThreatType::SuspiciousHandshake
        } else {
            ThreatType::InvalidSignature
        };
        let alert = self.alert_record(
            threat,
            &verdict,
            origin,
            AlertDetails {
                issues: verdict.reason_codes.clone(),
                detected_type: None,
                entropy: None,
                risk_score: local.proxy,
                blocked: true,
                reason: format!("handshake {} rejected", handshake_id),
                oracle: report.oracle.clone(),
            },
        );
        let alert_id = self.sinks.alerts.raise(alert).await;
        warn!(
            handshake_id = %handshake_id,
            alert_id = %alert_id,
            oracle = self.oracle.name(),
            reasons = ?verdict.reason_codes,
            "handshake rejected"
        );
        report.alert_id = Some(alert_id);
        self.audit(
            "failed",
            Some(handshake_id),
            origin,
            format!("rejected: {}", verdict.reason_codes.join(", ")),
        )
        .await;
        Ok(HandshakeOutcome::Suspicious(report))
    }

    /// Classify an upload, consult the oracle and persist or alert.
    ///
    /// # Errors
    ///
    /// [`GateError::EmptyInput`] for an empty upload. A bad-looking file is a
    /// REJECT report, not an error.
    pub async fn classify_and_decide_file(
        &self,
        upload: Upload,
        origin: &str,
    ) -> Result<FileReport, GateError> {
        let assessment = classify(
            &upload.data,
            upload.filename.as_deref(),
            upload.claimed_type.as_deref(),
        )?;
        debug!(
            size = assessment.size,
            detected_type = %assessment.detected_type,
            entropy = assessment.entropy,
            level = assessment.criticality_level.level(),
            "upload classified"
        );

        let oracle = {
            let _in_flight = InFlight::enter(&self.uploads_in_flight);
            let features = FileFeatures::from_context(&FileContext {
                data: &upload.data,
                assessment: &assessment,
                upload_duration: upload.upload_duration,
                concurrent_uploads: self.uploads_in_flight.load(Ordering::Relaxed),
            });
            into_signal(self.oracle.score_file(&features).await)
        };

        let local = LocalSignal::from_assessment(&assessment);
        let verdict = fuse(&local, &oracle, &self.policy);
        let mut report = FileReport::new(verdict.clone(), assessment.clone(), oracle.clone());

        if verdict.is_accept() {
            let record = TransferRecord {
                transfer_id: String::new(),
                filename: upload.filename.clone(),
                size: assessment.size,
                status: "completed".to_string(),
                progress: 100,
                encryption: self.encryption_label.clone(),
                detected_type: assessment.detected_type,
                entropy: assessment.entropy,
                entropy_variance: assessment.entropy_variance,
                sha256: digest(&upload.data),
                oracle,
                timestamp: Utc::now(),
            };
            let transfer_id = self.sinks.artifacts.persist(record, upload.data).await;
            info!(
                transfer_id = %transfer_id,
                size = assessment.size,
                score = verdict.combined_score,
                oracle = self.oracle.name(),
                "upload accepted"
            );
            report.transfer_id = Some(transfer_id);
            return Ok(report);
        }

        let alert = self.alert_record(
            file_threat(&assessment),
            &verdict,
            origin,
            AlertDetails {
                issues: verdict.reason_codes.clone(),
                detected_type: Some(assessment.detected_type),
                entropy: Some(assessment.entropy),
                risk_score: local.proxy,
                blocked: true,
                reason: format!(
                    "upload {} rejected at level {}",
                    upload.filename.as_deref().unwrap_or("<unnamed>"),
                    assessment.criticality_level
                ),
                oracle,
            },
        );
        let alert_id = self.sinks.alerts.raise(alert).await;
        warn!(
            alert_id = %alert_id,
            level = assessment.criticality_level.level(),
            score = verdict.combined_score,
            oracle = self.oracle.name(),
            reasons = ?verdict.reason_codes,
            "upload rejected"
        );
        report.alert_id = Some(alert_id);
        Ok(report)
    }

    fn alert_record(
        &self,
        threat_type: ThreatType,
        verdict: &FusionVerdict,
        origin: &str,
        details: AlertDetails,
    ) -> AlertRecord {
        AlertRecord {
            alert_id: String::new(),
            severity: verdict.severity,
            threat_type,
            confidence: verdict.combined_score,
            source_origin: origin.to_string(),
            timestamp: Utc::now(),
            resolved: false,
            score: verdict.combined_score,
            details,
        }
    }

    async fn audit(
        &self,
        status: &str,
        handshake_id: Option<HandshakeId>,
        origin: &str,
        detail: impl Into<String>,
    ) {
        self.sinks
            .audit
            .record(AuditEvent::new(status, handshake_id, origin, detail))
            .await;
    }
}

/// Threat classification for a rejected upload.
fn file_threat(assessment: &FileRiskAssessment) -> ThreatType {
    if assessment.criticality_level.level() >= 4 {
        ThreatType::MaliciousFile
    } else if !assessment.is_structurally_valid {
        ThreatType::CorruptedFile
    } else if assessment.type_mismatch {
        ThreatType::TypeSpoofing
    } else {
        ThreatType::SuspiciousFile
    }
}

/// Counts an upload as in flight until dropped.
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

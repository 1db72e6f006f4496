//! Decision side effects: audit events, alerts and artifacts.
//!
//! The gate emits one audit event per handshake attempt and, per decision,
//! exactly one of: an alert (REJECT) or an artifact / key release (ACCEPT).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{FileType, HandshakeId, OracleSignal, Severity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

/// Key-agreement scheme recorded on audit events.
pub const HANDSHAKE_TYPE: &str = "x25519-hkdf-sha256";

/// Connection event for one handshake init or validate attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Short status word: `pending`, `validated`, `failed` or `rejected`.
    pub status: String,
    /// Key-agreement scheme.
    pub handshake_type: String,
    /// Handshake, when one exists.
    pub handshake_id: Option<HandshakeId>,
    /// Caller network origin.
    pub origin: String,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Free-text detail.
    pub detail: String,
}

impl AuditEvent {
    /// Event stamped now.
    pub fn new(
        status: &str,
        handshake_id: Option<HandshakeId>,
        origin: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status: status.to_string(),
            handshake_type: HANDSHAKE_TYPE.to_string(),
            handshake_id,
            origin: origin.to_string(),
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }
}

/// Threat classification of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    /// Criticality level 4 upload.
    MaliciousFile,
    /// Upload failed its structural check.
    CorruptedFile,
    /// Extension or claimed type disagrees with content.
    TypeSpoofing,
    /// Any other rejected upload.
    SuspiciousFile,
    /// Handshake rejected by fusion.
    SuspiciousHandshake,
    /// Handshake confirmation signature did not verify.
    InvalidSignature,
}

/// Evidence attached to an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDetails {
    /// Local findings and decision flags.
    pub issues: Vec<String>,
    /// Detected file type, for uploads.
    pub detected_type: Option<FileType>,
    /// Whole-buffer entropy, for uploads.
    pub entropy: Option<f64>,
    /// Local risk proxy.
    pub risk_score: f64,
    /// Always true: the candidate was not persisted or released.
    pub blocked: bool,
    /// One-line summary.
    pub reason: String,
    /// Oracle result or failure marker.
    pub oracle: OracleSignal,
}

/// Incident record for one REJECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Assigned by the sink.
    pub alert_id: String,
    /// Severity bucket of the combined score.
    pub severity: Severity,
    /// Threat classification.
    pub threat_type: ThreatType,
    /// Confidence in the rejection: the combined score.
    pub confidence: f64,
    /// Caller network origin.
    pub source_origin: String,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// New alerts are unresolved.
    pub resolved: bool,
    /// Combined score.
    pub score: f64,
    /// Evidence.
    pub details: AlertDetails,
}

/// Transfer record for one accepted upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Assigned by the store.
    pub transfer_id: String,
    /// Client-supplied filename, if any.
    pub filename: Option<String>,
    /// Bytes stored.
    pub size: usize,
    /// Always `completed`.
    pub status: String,
    /// Always 100.
    pub progress: u8,
    /// Encryption method label.
    pub encryption: String,
    /// Detected type.
    pub detected_type: FileType,
    /// Whole-buffer entropy.
    pub entropy: f64,
    /// Windowed entropy variance.
    pub entropy_variance: f64,
    /// SHA-256 of the stored bytes.
    pub sha256: String,
    /// Oracle result or failure marker.
    pub oracle: OracleSignal,
    /// When the artifact was stored.
    pub timestamp: DateTime<Utc>,
}

/// Receives connection events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one event.
    async fn record(&self, event: AuditEvent);
}

/// Receives alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Raise an alert and return its id. `alert.alert_id` is overwritten.
    async fn raise(&self, alert: AlertRecord) -> String;
}

/// Persists accepted uploads.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the bytes and record, returning the transfer id.
    /// `record.transfer_id` is overwritten.
    async fn persist(&self, record: TransferRecord, data: Vec<u8>) -> String;
}

/// Hex SHA-256 of `data`.
pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// In-memory sink for all three record kinds.
#[derive(Default)]
pub struct MemorySink {
    audit: Mutex<Vec<AuditEvent>>,
    alerts: Mutex<Vec<AlertRecord>>,
    artifacts: Mutex<Vec<(TransferRecord, Vec<u8>)>>,
    seq: AtomicU64,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded audit events.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().clone()
    }

    /// Raised alerts.
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().clone()
    }

    /// Stored transfer records.
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.artifacts.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Stored bytes for `transfer_id`.
    pub fn artifact_bytes(&self, transfer_id: &str) -> Option<Vec<u8>> {
        self.artifacts
            .lock()
            .iter()
            .find(|(r, _)| r.transfer_id == transfer_id)
            .map(|(_, data)| data.clone())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{:06}", prefix, self.seq.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn record(&self, event: AuditEvent) {
        self.audit.lock().push(event);
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn raise(&self, mut alert: AlertRecord) -> String {
        let id = self.next_id("alert");
        alert.alert_id = id.clone();
        self.alerts.lock().push(alert);
        id
    }
}

#[async_trait]
impl ArtifactStore for MemorySink {
    async fn persist(&self, mut record: TransferRecord, data: Vec<u8>) -> String {
        let id = self.next_id("transfer");
        record.transfer_id = id.clone();
        self.artifacts.lock().push((record, data));
        id
    }
}

/// Emits audit events and alerts as structured log lines.
#[derive(Default)]
pub struct TracingSink {
    seq: AtomicU64,
}

impl TracingSink {
    /// New sink.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for TracingSink {
    async fn record(&self, event: AuditEvent) {
        let id = event.handshake_id.map(|id| id.to_string()).unwrap_or_default();
        info!(
            target: "gatekeeper::audit",
            status = %event.status,
            handshake_type = %event.handshake_type,
            handshake_id = %id,
            origin = %event.origin,
            detail = %event.detail,
            "connection event"
        );
    }
}

#[async_trait]
impl AlertSink for TracingSink {
    async fn raise(&self, mut alert: AlertRecord) -> String {
        let id = format!(
            "alert-{}-{:06}",
            alert.timestamp.format("%Y%m%d%H%M%S"),
            self.seq.fetch_add(1, Ordering::Relaxed) + 1
        );
        alert.alert_id = id.clone();
        let details = serde_json::to_string(&alert.details).unwrap_or_default();
        warn!(
            target: "gatekeeper::alert",
            alert_id = %alert.alert_id,
            severity = ?alert.severity,
            threat_type = ?alert.threat_type,
            score = alert.score,
            origin = %alert.source_origin,
            details = %details,
            "alert raised"
        );
        id
    }
}

/// Writes accepted uploads and their records to a directory.
///
/// Layout: `<dir>/<transfer_id>.bin` and `<dir>/<transfer_id>.json`.
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for DirectoryStore {
    async fn persist(&self, mut record: TransferRecord, data: Vec<u8>) -> String {
        // content-addressed; an identical upload overwrites its own bytes
        let id = format!("transfer-{}", &record.sha256[..16.min(record.sha256.len())]);
        record.transfer_id = id.clone();

        let bin = self.dir.join(format!("{}.bin", id));
        let meta = self.dir.join(format!("{}.json", id));
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&bin, &data).await?;
            let json = serde_json::to_vec_pretty(&record).map_err(std::io::Error::other)?;
            tokio::fs::write(&meta, json).await
        }
        .await;

        match result {
            Ok(()) => info!(transfer_id = %id, size = record.size, path = %bin.display(), "artifact stored"),
            Err(e) => error!(transfer_id = %id, error = %e, "artifact write failed"),
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(data: &[u8]) -> TransferRecord {
        TransferRecord {
            transfer_id: String::new(),
            filename: Some("a.txt".into()),
            size: data.len(),
            status: "completed".into(),
            progress: 100,
            encryption: "none".into(),
            detected_type: FileType::UnknownBinary,
            entropy: 4.6,
            entropy_variance: 0.0,
            sha256: digest(data),
            oracle: OracleSignal::Unavailable {
                reason: "timeout".into(),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_assigns_ids() {
        let sink = MemorySink::new();
        let id = sink.persist(transfer(b"abc"), b"abc".to_vec()).await;
        assert_eq!(id, "transfer-000001");
        assert_eq!(sink.transfers()[0].transfer_id, id);
        assert_eq!(sink.artifact_bytes(&id).unwrap(), b"abc");
        assert!(sink.alerts().is_empty());
    }

    #[test]
    fn test_digest() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_threat_type_names() {
        let json = serde_json::to_value(ThreatType::TypeSpoofing).unwrap();
        assert_eq!(json, "type_spoofing");
    }
}

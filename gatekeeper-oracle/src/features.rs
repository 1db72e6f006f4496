//! Feature records sent to the oracle.
//!
//! Field names are the oracle's column names. Derived columns are computed
//! here so the oracle sees exactly what it was trained on.

use std::io::Write;
use std::time::Duration;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use gatekeeper_core::entropy::shannon_entropy;
use gatekeeper_core::keys::KEY_BITS;
use gatekeeper_core::FileRiskAssessment;
use serde::Serialize;

/// Wire protocol version reported to the oracle.
pub const PROTOCOL_VERSION: f64 = 1.0;

/// Reputation placeholder until a reputation source exists.
pub const DEFAULT_IP_REPUTATION: f64 = 0.5;

/// Geolocation placeholder until a geolocation source exists.
pub const DEFAULT_GEOLOCATION_RISK: f64 = 0.2;

/// Retry placeholder. A handshake id is claimed by its first validate call,
/// so no refused attempt can precede the one that gets scored.
pub const DEFAULT_RETRY_COUNT: u32 = 0;

/// Entropy at which a buffer is reported as encrypted.
pub const ENCRYPTED_ENTROPY: f64 = 7.9;

/// Prefix length used for the compression ratio.
const COMPRESSION_SAMPLE: usize = 1 << 20;

const MIB: f64 = 1024.0 * 1024.0;

/// What the server knows about a handshake at validation time.
#[derive(Debug, Clone)]
pub struct HandshakeContext {
    /// Time from INIT to the winning validate call.
    pub duration: Duration,
    /// Client public value.
    pub client_public: [u8; 32],
    /// Server public value.
    pub server_public: [u8; 32],
    /// Confirmation signature outcome (true when none was sent).
    pub signature_valid: bool,
    /// Client handshake retries (see [`DEFAULT_RETRY_COUNT`]).
    pub retry_count: u32,
    /// UTC hour of the validation.
    pub timestamp_hour: u32,
    /// Source reputation in [0, 1], higher is better.
    pub ip_reputation: f64,
    /// Source geolocation risk in [0, 1].
    pub geolocation_risk: f64,
}

/// Handshake feature record.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandshakeFeatures {
    pub handshake_duration: f64,
    pub key_size: f64,
    pub signature_valid: f64,
    pub client_entropy: f64,
    pub server_entropy: f64,
    pub retry_count: f64,
    pub timestamp_hour: f64,
    pub ip_reputation: f64,
    pub geolocation_risk: f64,
    pub protocol_version: f64,
    pub entropy_diff: f64,
    pub entropy_ratio: f64,
    pub duration_per_byte: f64,
    pub risk_composite: f64,
    pub retry_ratio: f64,
}

impl HandshakeFeatures {
    /// Build the record, including derived columns.
    pub fn from_context(ctx: &HandshakeContext) -> Self {
        let duration = ctx.duration.as_secs_f64();
        let key_size = f64::from(KEY_BITS);
        let client_entropy = shannon_entropy(&ctx.client_public);
        let server_entropy = shannon_entropy(&ctx.server_public);
        let retry_count = f64::from(ctx.retry_count);
        Self {
            handshake_duration: duration,
            key_size,
            signature_valid: flag(ctx.signature_valid),
            client_entropy,
            server_entropy,
            retry_count,
            timestamp_hour: f64::from(ctx.timestamp_hour),
            ip_reputation: ctx.ip_reputation,
            geolocation_risk: ctx.geolocation_risk,
            protocol_version: PROTOCOL_VERSION,
            entropy_diff: (client_entropy - server_entropy).abs(),
            entropy_ratio: client_entropy / (server_entropy + 1e-10),
            duration_per_byte: duration / (key_size + 1.0),
            risk_composite: (ctx.ip_reputation + ctx.geolocation_risk) / 2.0,
            retry_ratio: retry_count / (duration + 1.0),
        }
    }
}

/// What the server knows about an upload at decision time.
#[derive(Debug, Clone, Copy)]
pub struct FileContext<'a> {
    /// File bytes.
    pub data: &'a [u8],
    /// Local classifier output for `data`.
    pub assessment: &'a FileRiskAssessment,
    /// Time spent receiving the upload.
    pub upload_duration: Duration,
    /// Uploads in flight, this one included.
    pub concurrent_uploads: u32,
}

/// File feature record.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFeatures {
    pub file_size: f64,
    pub file_entropy: f64,
    pub file_type_risk: f64,
    pub encryption_strength: f64,
    pub upload_duration: f64,
    pub compression_ratio: f64,
    pub metadata_anomaly: f64,
    pub transfer_speed: f64,
    pub packet_loss: f64,
    pub concurrent_uploads: f64,
    pub size_log: f64,
    pub entropy_per_byte: f64,
    pub speed_per_mb: f64,
    pub risk_score: f64,
    pub suspicious_ratio: f64,
    pub high_entropy: f64,
    pub low_entropy: f64,
    pub suspicious_size: f64,
}

impl FileFeatures {
    /// Build the record, including derived columns.
    pub fn from_context(ctx: &FileContext<'_>) -> Self {
        let assessment = ctx.assessment;
        let size = assessment.size as f64;
        let entropy = assessment.entropy;
        let type_risk = assessment.detected_type.risk();
        let metadata_anomaly = assessment.issues.len().min(10) as f64;
        let upload_duration = ctx.upload_duration.as_secs_f64();
        let transfer_speed = size / upload_duration.max(1e-3);
        let packet_loss = 0.0;

        Self {
            file_size: size,
            file_entropy: entropy,
            file_type_risk: type_risk,
            encryption_strength: if entropy >= ENCRYPTED_ENTROPY { 256.0 } else { 0.0 },
            upload_duration,
            compression_ratio: compression_ratio(ctx.data),
            metadata_anomaly,
            transfer_speed,
            packet_loss,
            concurrent_uploads: f64::from(ctx.concurrent_uploads),
            size_log: size.ln_1p(),
            entropy_per_byte: entropy / (size + 1.0),
            speed_per_mb: transfer_speed / (size / MIB + 1.0),
            risk_score: type_risk * 0.3
                + (entropy / 8.0) * 0.3
                + (metadata_anomaly / 10.0) * 0.2
                + f64::min(packet_loss, 1.0) * 0.2,
            suspicious_ratio: (entropy / 8.0 + metadata_anomaly / 10.0) / 2.0,
            high_entropy: flag(entropy > 7.5),
            low_entropy: flag(entropy < 3.0),
            suspicious_size: flag(size > 50.0 * MIB),
        }
    }
}

/// Deflate-compressed size over original size, on a bounded prefix.
///
/// Falls back to 1.0 (incompressible) if the encoder fails.
pub fn compression_ratio(data: &[u8]) -> f64 {
    let sample = &data[..data.len().min(COMPRESSION_SAMPLE)];
    if sample.is_empty() {
        return 1.0;
    }
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    let compressed = encoder
        .write_all(sample)
        .and_then(|()| encoder.finish())
        .map(|out| out.len());
    match compressed {
        Ok(len) => len as f64 / sample.len() as f64,
        Err(_) => 1.0,
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::classify;

    fn context(retry_count: u32, duration: Duration) -> HandshakeContext {
        HandshakeContext {
            duration,
            client_public: [7u8; 32],
            server_public: core::array::from_fn(|i| i as u8),
            signature_valid: true,
            retry_count,
            timestamp_hour: 14,
            ip_reputation: DEFAULT_IP_REPUTATION,
            geolocation_risk: DEFAULT_GEOLOCATION_RISK,
        }
    }

    #[test]
    fn test_handshake_derived_columns() {
        let f = HandshakeFeatures::from_context(&context(1, Duration::from_secs(1)));
        assert_eq!(f.key_size, 256.0);
        assert_eq!(f.client_entropy, 0.0);
        assert!((f.server_entropy - 5.0).abs() < 1e-12);
        assert!((f.entropy_diff - 5.0).abs() < 1e-12);
        assert!(f.entropy_ratio < 1e-9);
        assert!((f.duration_per_byte - 1.0 / 257.0).abs() < 1e-12);
        assert!((f.risk_composite - 0.35).abs() < 1e-12);
        assert!((f.retry_ratio - 0.5).abs() < 1e-12);
        assert_eq!(f.signature_valid, 1.0);
    }

    #[test]
    fn test_placeholder_retry_count_sends_zero() {
        let f = HandshakeFeatures::from_context(&context(
            DEFAULT_RETRY_COUNT,
            Duration::from_millis(20),
        ));
        assert_eq!(f.retry_count, 0.0);
        assert_eq!(f.retry_ratio, 0.0);
    }

    #[test]
    fn test_handshake_column_names() {
        let f = HandshakeFeatures::from_context(&context(0, Duration::from_millis(20)));
        let json = serde_json::to_value(&f).unwrap();
        let obj = json.as_object().unwrap();
        for name in [
            "handshake_duration",
            "key_size",
            "signature_valid",
            "client_entropy",
            "server_entropy",
            "retry_count",
            "timestamp_hour",
            "ip_reputation",
            "geolocation_risk",
            "protocol_version",
        ] {
            assert!(obj.contains_key(name), "missing {}", name);
        }
        assert_eq!(obj.len(), 15);
    }

    #[test]
    fn test_file_features_for_text() {
        let data = b"Invoice #7781 (paid): EUR 1,250 - Jakob";
        let assessment = classify(data, Some("invoice.txt"), None).unwrap();
        let f = FileFeatures::from_context(&FileContext {
            data,
            assessment: &assessment,
            upload_duration: Duration::from_millis(500),
            concurrent_uploads: 1,
        });
        assert_eq!(f.file_size, 39.0);
        assert_eq!(f.encryption_strength, 0.0);
        assert!((f.transfer_speed - 78.0).abs() < 1e-9);
        assert!((f.size_log - 40f64.ln()).abs() < 1e-12);
        assert_eq!(f.packet_loss, 0.0);
        assert_eq!(f.high_entropy, 0.0);
        assert_eq!(f.low_entropy, 0.0);
        assert_eq!(f.suspicious_size, 0.0);
    }

    #[test]
    fn test_zero_duration_upload_is_finite() {
        let data = [1u8, 2, 3];
        let assessment = classify(&data, None, None).unwrap();
        let f = FileFeatures::from_context(&FileContext {
            data: &data,
            assessment: &assessment,
            upload_duration: Duration::ZERO,
            concurrent_uploads: 1,
        });
        assert!(f.transfer_speed.is_finite());
        assert!(f.speed_per_mb.is_finite());
    }

    #[test]
    fn test_compression_ratio() {
        assert!(compression_ratio(&[0u8; 4096]) < 0.05);
        assert_eq!(compression_ratio(&[]), 1.0);
    }
}

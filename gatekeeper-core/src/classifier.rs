//! File risk classification.
//!
//! Combines type detection, structural checks, extension/claim consistency,
//! pattern checks and entropy banding into one [`FileRiskAssessment`]. The
//! entropy band is the sole source of the base criticality level; every other
//! check contributes issues and can only raise the level.
//!
//! Classification is pure and touches no shared state, so independent uploads
//! can be classified in parallel.

use serde::{Deserialize, Serialize};

use crate::entropy::EntropyProfile;
use crate::error::GateError;
use crate::pattern;
use crate::signature::{self, FileType};
use crate::structure::{self, StructuralCheck};

/// Ordered criticality, 0 (safe) to 4 (block immediately).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Criticality(u8);

impl Criticality {
    /// Normal content.
    pub const SAFE: Self = Self(0);
    /// Unexpected but not blocking.
    pub const ELEVATED: Self = Self(1);
    /// Suspicious; blocks uploads.
    pub const HIGH: Self = Self(2);
    /// Truncated or broken.
    pub const SEVERE: Self = Self(3);
    /// Degenerate or indistinguishable from random data.
    pub const CRITICAL: Self = Self(4);

    /// Numeric level.
    pub fn level(self) -> u8 {
        self.0
    }

    /// Monotone mapping into [0, 1].
    pub fn proxy(self) -> f64 {
        f64::from(self.0) / 4.0
    }

    /// Raise to at least `floor`; never lowers.
    #[must_use]
    pub fn at_least(self, floor: Self) -> Self {
        self.max(floor)
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lower bound of the normal entropy band.
pub const ENTROPY_LOW: f64 = 4.5;
/// Lower bound of the high entropy band.
pub const ENTROPY_HIGH: f64 = 7.2;
/// Lower bound of the extreme entropy band.
pub const ENTROPY_EXTREME: f64 = 7.9;

/// Map whole-buffer entropy to its band.
///
/// Returns the level and the band label, or `None` for a value outside every
/// band (non-finite or negative).
pub fn entropy_band(entropy: f64) -> Option<(Criticality, &'static str)> {
    match entropy {
        e if e == 0.0 => Some((Criticality::CRITICAL, "empty or fully degenerate")),
        e if e > 0.0 && e < ENTROPY_LOW => Some((
            Criticality::SEVERE,
            "abnormally low, truncated or broken structure",
        )),
        e if (ENTROPY_LOW..ENTROPY_HIGH).contains(&e) => Some((Criticality::SAFE, "normal")),
        e if (ENTROPY_HIGH..ENTROPY_EXTREME).contains(&e) => Some((
            Criticality::HIGH,
            "high, compressed, encrypted or suspicious",
        )),
        e if e >= ENTROPY_EXTREME && e.is_finite() => Some((
            Criticality::CRITICAL,
            "extreme, indistinguishable from random data",
        )),
        _ => None,
    }
}

/// Local, ML-free risk assessment of one upload.
///
/// Built fresh per call and never mutated after return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRiskAssessment {
    /// Content-detected type; the generic unknown type when nothing matched.
    pub detected_type: FileType,
    /// Whole-buffer Shannon entropy, bits per byte.
    pub entropy: f64,
    /// Variance of windowed entropy.
    pub entropy_variance: f64,
    /// Findings in the order they were produced.
    pub issues: Vec<String>,
    /// Final criticality level.
    pub criticality_level: Criticality,
    /// False when the type-specific structural check failed.
    pub is_structurally_valid: bool,
    /// Filename extension or claimed type disagrees with the content.
    pub type_mismatch: bool,
    /// Buffer length in bytes.
    pub size: usize,
}

impl FileRiskAssessment {
    /// Local risk proxy for fusion.
    pub fn local_proxy(&self) -> f64 {
        self.criticality_level.proxy()
    }
}

/// Classify an upload.
///
/// # Errors
///
/// [`GateError::EmptyInput`] for an empty buffer. A bad-looking file is never
/// an error.
pub fn classify(
    data: &[u8],
    filename: Option<&str>,
    claimed_type: Option<&str>,
) -> Result<FileRiskAssessment, GateError> {
    if data.is_empty() {
        return Err(GateError::EmptyInput);
    }

    let mut issues = Vec::new();
    let mut floor = Criticality::SAFE;
    let mut type_mismatch = false;

    let detected_type = signature::detect(data);

    let structural = structure::validate(detected_type, data);
    if let StructuralCheck::Invalid(reasons) = &structural {
        issues.extend(reasons.iter().cloned());
        floor = floor.at_least(Criticality::HIGH);
    }

    if !detected_type.is_unknown() {
        if let Some(expected) = filename.and_then(FileType::from_extension) {
            if expected != detected_type {
                issues.push(format!(
                    "extension mismatch: name suggests {}, content is {}",
                    expected, detected_type
                ));
                type_mismatch = true;
                floor = floor.at_least(Criticality::HIGH);
            }
        }
        if let Some(claimed) = claimed_type.and_then(FileType::from_mime) {
            if claimed != detected_type {
                issues.push(format!(
                    "claimed type mismatch: declared {}, content is {}",
                    claimed, detected_type
                ));
                type_mismatch = true;
                floor = floor.at_least(Criticality::HIGH);
            }
        }
    }

    let findings = pattern::detect(data);
    if !findings.is_empty() {
        floor = floor.at_least(Criticality::ELEVATED);
    }
    issues.extend(findings.iter().map(|f| f.describe()));

    let profile = EntropyProfile::analyze(data);
    let base = match entropy_band(profile.entropy) {
        Some((level, label)) => {
            if level != Criticality::SAFE {
                issues.push(format!("entropy {:.3} bits/byte: {}", profile.entropy, label));
            }
            level
        }
        None => {
            issues.push(format!("unexpected entropy pattern: {}", profile.entropy));
            Criticality::ELEVATED
        }
    };

    Ok(FileRiskAssessment {
        detected_type,
        entropy: profile.entropy,
        entropy_variance: profile.variance,
        issues,
        criticality_level: base.at_least(floor),
        is_structurally_valid: structural.is_valid(),
        type_mismatch,
        size: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::fixtures::{png_image, zip_archive};
    use sha2::{Digest, Sha256};

    fn pseudo_random(label: &[u8], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len + 32);
        let mut counter = 0u64;
        while out.len() < len {
            let mut h = Sha256::new();
            h.update(label);
            h.update(counter.to_le_bytes());
            out.extend_from_slice(&h.finalize());
            counter += 1;
        }
        out.truncate(len);
        out
    }

    /// 16 values once plus 8 values twice: exactly 4.5 bits/byte.
    fn four_and_a_half_bits() -> Vec<u8> {
        let mut data: Vec<u8> = (0x40..0x50).collect();
        for v in 0x60..0x68u8 {
            data.push(v);
            data.push(v);
        }
        data
    }

    #[test]
    fn test_empty_input_is_error() {
        assert_eq!(classify(&[], None, None), Err(GateError::EmptyInput));
        assert_eq!(
            classify(&[], Some("a.png"), Some("image/png")),
            Err(GateError::EmptyInput)
        );
    }

    #[test]
    fn test_entropy_band_boundaries() {
        assert_eq!(entropy_band(0.0).map(|b| b.0), Some(Criticality::CRITICAL));
        assert_eq!(entropy_band(4.499).map(|b| b.0), Some(Criticality::SEVERE));
        assert_eq!(entropy_band(4.5).map(|b| b.0), Some(Criticality::SAFE));
        assert_eq!(entropy_band(7.199).map(|b| b.0), Some(Criticality::SAFE));
        assert_eq!(entropy_band(7.2).map(|b| b.0), Some(Criticality::HIGH));
        assert_eq!(entropy_band(7.899).map(|b| b.0), Some(Criticality::HIGH));
        assert_eq!(entropy_band(7.9).map(|b| b.0), Some(Criticality::CRITICAL));
        assert_eq!(entropy_band(8.0).map(|b| b.0), Some(Criticality::CRITICAL));
    }

    #[test]
    fn test_out_of_band_values() {
        assert!(entropy_band(f64::NAN).is_none());
        assert!(entropy_band(-0.5).is_none());
        assert!(entropy_band(f64::INFINITY).is_none());
    }

    #[test]
    fn test_buffer_at_exactly_four_and_a_half_bits_is_safe() {
        let data = four_and_a_half_bits();
        let a = classify(&data, None, None).unwrap();
        assert_eq!(a.entropy, 4.5);
        assert_eq!(a.criticality_level, Criticality::SAFE);
        assert!(a.issues.is_empty());
    }

    #[test]
    fn test_identical_bytes_always_level_four() {
        for len in [1usize, 2, 100, 10_000] {
            let a = classify(&vec![0x41; len], None, None).unwrap();
            assert_eq!(a.entropy, 0.0);
            assert_eq!(a.criticality_level, Criticality::CRITICAL);
        }
    }

    #[test]
    fn test_random_bytes_extreme() {
        let data = pseudo_random(b"scenario-a", 2048);
        let a = classify(&data, None, None).unwrap();
        assert_eq!(a.detected_type, FileType::UnknownBinary);
        assert!(a.entropy >= ENTROPY_EXTREME, "entropy {}", a.entropy);
        assert_eq!(a.criticality_level, Criticality::CRITICAL);
    }

    #[test]
    fn test_plain_text_is_safe() {
        let a = classify(b"Invoice #7781 (paid): EUR 1,250 - Jakob", Some("valid.txt"), None).unwrap();
        assert_eq!(a.criticality_level, Criticality::SAFE);
        assert!(a.is_structurally_valid);
        assert!(a.issues.is_empty(), "{:?}", a.issues);
    }

    #[test]
    fn test_truncated_jpeg_forced_high() {
        // normal-band entropy body, JPEG signature, no FFD9
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend(four_and_a_half_bits());
        let a = classify(&data, Some("photo.jpg"), Some("image/jpeg")).unwrap();
        assert_eq!(a.detected_type, FileType::Jpeg);
        assert!(!a.is_structurally_valid);
        assert!(a.criticality_level >= Criticality::HIGH);
        assert!(a.issues[0].contains("FFD9"));
    }

    #[test]
    fn test_structural_failure_never_lowers_level() {
        // JPEG header then a single repeated byte: entropy band would say 3
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend(vec![0x11; 400]);
        let a = classify(&data, None, None).unwrap();
        assert!(!a.is_structurally_valid);
        assert_eq!(a.criticality_level, Criticality::SEVERE);
    }

    #[test]
    fn test_truncated_png() {
        let png = png_image();
        let a = classify(&png[..png.len() - 12], Some("image.png"), None).unwrap();
        assert!(!a.is_structurally_valid);
        assert!(a.criticality_level >= Criticality::HIGH);
    }

    #[test]
    fn test_extension_mismatch() {
        let zip = zip_archive(b"readme.txt", b"0123456789abcdefghijklmnopqrstuv");
        let a = classify(&zip, Some("holiday.png"), None).unwrap();
        assert!(a.is_structurally_valid);
        assert!(a.issues.iter().any(|i| i.starts_with("extension mismatch")));
        assert!(a.type_mismatch);
        assert!(a.criticality_level >= Criticality::HIGH);
    }

    #[test]
    fn test_unknown_type_skips_mismatch() {
        let a = classify(b"Invoice #7781 (paid): EUR 1,250 - Jakob", Some("scan.png"), Some("image/png")).unwrap();
        assert!(!a.issues.iter().any(|i| i.contains("mismatch")));
        assert!(!a.type_mismatch);
    }

    #[test]
    fn test_claimed_type_mismatch() {
        let png = png_image();
        let a = classify(&png, None, Some("application/pdf")).unwrap();
        assert!(a.issues.iter().any(|i| i.starts_with("claimed type mismatch")));
        assert!(a.criticality_level >= Criticality::HIGH);
    }

    #[test]
    fn test_pattern_findings_raise_to_elevated() {
        // text padded with zeros: 25% null bytes
        let mut data = b"Invoice #7781 (paid): EUR 1,250 - Jakob; ref QX-55/9 wire".to_vec();
        let pad = data.len() / 3;
        data.extend(vec![0u8; pad]);
        let a = classify(&data, None, None).unwrap();
        assert!(a.issues.iter().any(|i| i.starts_with("null-byte flooding")));
        assert!(a.criticality_level >= Criticality::ELEVATED);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let data = pseudo_random(b"idempotence", 4096);
        let first = classify(&data, Some("x.bin"), Some("application/octet-stream")).unwrap();
        let second = classify(&data, Some("x.bin"), Some("application/octet-stream")).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_proxy_is_monotone() {
        let levels = [
            Criticality::SAFE,
            Criticality::ELEVATED,
            Criticality::HIGH,
            Criticality::SEVERE,
            Criticality::CRITICAL,
        ];
        for pair in levels.windows(2) {
            assert!(pair[0].proxy() < pair[1].proxy());
        }
        assert_eq!(Criticality::CRITICAL.proxy(), 1.0);
    }
}

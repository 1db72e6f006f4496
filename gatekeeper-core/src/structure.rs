//! Per-type structural integrity checks.
//!
//! Each validator looks only far enough into the format to catch truncation
//! and obvious corruption. Parser trouble is reported as a typed finding, not
//! as an error.

use serde::{Deserialize, Serialize};

use crate::signature::FileType;

/// How far from the end a PDF `%%EOF` marker may sit.
const PDF_TRAILER_WINDOW: usize = 1024;

/// Maximum EOCD search distance (record + maximum comment).
const ZIP_EOCD_SEARCH: usize = 22 + u16::MAX as usize;

/// Outcome of a structural check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reasons", rename_all = "snake_case")]
pub enum StructuralCheck {
    /// The format-specific checks passed.
    Valid,
    /// No structural validator exists for this type.
    NotChecked,
    /// One or more checks failed.
    Invalid(Vec<String>),
}

impl StructuralCheck {
    /// False only for [`StructuralCheck::Invalid`].
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self::Invalid(vec![reason.into()])
    }
}

/// Dispatch to the validator for `kind`.
pub fn validate(kind: FileType, data: &[u8]) -> StructuralCheck {
    match kind {
        FileType::Jpeg => validate_jpeg(data),
        FileType::Png => validate_png(data),
        FileType::Pdf => validate_pdf(data),
        FileType::Zip => validate_zip(data),
        _ => StructuralCheck::NotChecked,
    }
}

fn validate_jpeg(data: &[u8]) -> StructuralCheck {
    if data.ends_with(&[0xFF, 0xD9]) {
        StructuralCheck::Valid
    } else {
        StructuralCheck::fail("JPEG end-of-image marker (FFD9) missing")
    }
}

fn validate_png(data: &[u8]) -> StructuralCheck {
    let mut reasons = Vec::new();
    let mut offset = 8usize;
    let mut saw_iend = false;
    while offset + 8 <= data.len() {
        let length = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let ctype = &data[offset + 4..offset + 8];
        let chunk_end = offset.saturating_add(12).saturating_add(length);
        if chunk_end > data.len() {
            reasons.push(format!(
                "PNG chunk {} exceeds buffer",
                String::from_utf8_lossy(ctype)
            ));
            break;
        }
        if ctype == b"IEND" {
            saw_iend = true;
            break;
        }
        offset = chunk_end;
    }
    // only a walked IEND chunk counts; the bytes may appear inside chunk data
    if !saw_iend {
        reasons.push("PNG IEND chunk missing".to_string());
    }
    if reasons.is_empty() {
        StructuralCheck::Valid
    } else {
        StructuralCheck::Invalid(reasons)
    }
}

fn validate_pdf(data: &[u8]) -> StructuralCheck {
    let tail = &data[data.len().saturating_sub(PDF_TRAILER_WINDOW)..];
    if contains(tail, b"%%EOF") {
        StructuralCheck::Valid
    } else {
        StructuralCheck::fail("PDF %%EOF trailer missing")
    }
}

fn validate_zip(data: &[u8]) -> StructuralCheck {
    let Some(eocd) = find_eocd(data) else {
        return StructuralCheck::fail("ZIP end of central directory missing");
    };
    if eocd + 22 > data.len() {
        return StructuralCheck::fail("ZIP end of central directory truncated");
    }
    let entries = u16::from_le_bytes([data[eocd + 10], data[eocd + 11]]) as usize;
    let cd_size = read_u32_le(data, eocd + 12) as usize;
    let cd_offset = read_u32_le(data, eocd + 16) as usize;

    if entries == 0 {
        return StructuralCheck::fail("ZIP archive has no entries");
    }
    if cd_offset.saturating_add(cd_size) > eocd {
        return StructuralCheck::fail("ZIP central directory out of bounds");
    }
    if cd_offset + 46 > data.len() || &data[cd_offset..cd_offset + 4] != b"PK\x01\x02" {
        return StructuralCheck::fail("ZIP central directory unreadable");
    }

    // First entry: its local header must be where the directory says.
    let name_len = u16::from_le_bytes([data[cd_offset + 28], data[cd_offset + 29]]) as usize;
    if cd_offset + 46 + name_len > data.len() {
        return StructuralCheck::fail("ZIP central directory entry truncated");
    }
    let local = read_u32_le(data, cd_offset + 42) as usize;
    if local + 30 > data.len() || &data[local..local + 4] != b"PK\x03\x04" {
        return StructuralCheck::fail("ZIP entry local header unreadable");
    }
    let local_name = u16::from_le_bytes([data[local + 26], data[local + 27]]) as usize;
    let local_extra = u16::from_le_bytes([data[local + 28], data[local + 29]]) as usize;
    let compressed = read_u32_le(data, local + 18) as usize;
    let data_end = (local + 30)
        .saturating_add(local_name)
        .saturating_add(local_extra)
        .saturating_add(compressed);
    if data_end > data.len() {
        return StructuralCheck::fail("ZIP entry data exceeds buffer");
    }
    StructuralCheck::Valid
}

fn find_eocd(data: &[u8]) -> Option<usize> {
    if data.len() < 4 {
        return None;
    }
    let start = data.len().saturating_sub(ZIP_EOCD_SEARCH);
    (start..=data.len() - 4)
        .rev()
        .find(|&idx| &data[idx..idx + 4] == b"PK\x05\x06")
}

fn read_u32_le(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_jpeg_end_marker() {
        let good = [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 0xFF, 0xD9];
        assert_eq!(validate(FileType::Jpeg, &good), StructuralCheck::Valid);
        let truncated = [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        assert!(!validate(FileType::Jpeg, &truncated).is_valid());
    }

    #[test]
    fn test_png_complete_and_truncated() {
        let png = png_image();
        assert_eq!(validate(FileType::Png, &png), StructuralCheck::Valid);

        let truncated = &png[..png.len() - 12];
        let check = validate(FileType::Png, truncated);
        assert!(!check.is_valid());
        if let StructuralCheck::Invalid(reasons) = check {
            assert!(reasons.iter().any(|r| r.contains("IEND")));
        }
    }

    #[test]
    fn test_png_iend_bytes_inside_chunk_data() {
        let png = png_image();
        // IHDR plus a complete IDAT whose payload spells IEND, no IEND chunk
        let mut cut = png[..png.len() - 12].to_vec();
        cut.extend_from_slice(&4u32.to_be_bytes());
        cut.extend_from_slice(b"IDAT");
        cut.extend_from_slice(b"IEND");
        cut.extend_from_slice(&[0u8; 4]);
        let StructuralCheck::Invalid(reasons) = validate(FileType::Png, &cut) else {
            panic!("expected invalid");
        };
        assert_eq!(reasons, ["PNG IEND chunk missing"]);
    }

    #[test]
    fn test_png_chunk_overrun_reported() {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&1000u32.to_be_bytes());
        png.extend_from_slice(b"IDAT");
        png.extend_from_slice(&[0u8; 16]);
        let StructuralCheck::Invalid(reasons) = validate(FileType::Png, &png) else {
            panic!("expected invalid");
        };
        assert!(reasons.iter().any(|r| r.contains("exceeds buffer")));
    }

    #[test]
    fn test_pdf_trailer() {
        let good = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\ntrailer\n<<>>\n%%EOF\n";
        assert_eq!(validate(FileType::Pdf, good), StructuralCheck::Valid);
        let cut = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n";
        assert!(!validate(FileType::Pdf, cut).is_valid());
    }

    #[test]
    fn test_zip_readable_directory() {
        let zip = zip_archive(b"a.txt", b"hello");
        assert_eq!(validate(FileType::Zip, &zip), StructuralCheck::Valid);
    }

    #[test]
    fn test_zip_without_directory() {
        let zip = zip_archive(b"a.txt", b"hello");
        let local_only = &zip[..30 + 5 + 5];
        assert!(!validate(FileType::Zip, local_only).is_valid());
    }

    #[test]
    fn test_zip_bad_directory_offset() {
        let mut zip = zip_archive(b"a.txt", b"hello");
        let eocd = zip.len() - 22;
        zip[eocd + 16..eocd + 20].copy_from_slice(&3u32.to_le_bytes());
        assert!(!validate(FileType::Zip, &zip).is_valid());
    }

    #[test]
    fn test_unvalidated_types() {
        assert_eq!(validate(FileType::Gif, b"GIF89a"), StructuralCheck::NotChecked);
        assert_eq!(
            validate(FileType::UnknownBinary, b"abc"),
            StructuralCheck::NotChecked
        );
    }
}

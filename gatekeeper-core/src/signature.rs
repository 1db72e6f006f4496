//! Magic-byte type detection.
//!
//! The table is scanned in order and the first match wins. Entries are kept
//! sorted by descending prefix length so that a more specific signature is
//! always tried before a shorter one it overlaps with.

use serde::{Deserialize, Serialize};

/// File types the gate can recognize from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// PNG image.
    #[serde(rename = "image/png")]
    Png,
    /// JPEG image.
    #[serde(rename = "image/jpeg")]
    Jpeg,
    /// GIF image.
    #[serde(rename = "image/gif")]
    Gif,
    /// BMP image.
    #[serde(rename = "image/bmp")]
    Bmp,
    /// PDF document.
    #[serde(rename = "application/pdf")]
    Pdf,
    /// ZIP archive (including OOXML/JAR containers).
    #[serde(rename = "application/zip")]
    Zip,
    /// 7-Zip archive.
    #[serde(rename = "application/x-7z-compressed")]
    SevenZip,
    /// RAR archive.
    #[serde(rename = "application/vnd.rar")]
    Rar,
    /// Gzip stream.
    #[serde(rename = "application/gzip")]
    Gzip,
    /// ELF executable.
    #[serde(rename = "application/x-elf")]
    Elf,
    /// PE/COFF executable.
    #[serde(rename = "application/x-msdownload")]
    Pe,
    /// No signature matched.
    #[serde(rename = "application/octet-stream")]
    UnknownBinary,
}

impl FileType {
    /// MIME-like label.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Pdf => "application/pdf",
            Self::Zip => "application/zip",
            Self::SevenZip => "application/x-7z-compressed",
            Self::Rar => "application/vnd.rar",
            Self::Gzip => "application/gzip",
            Self::Elf => "application/x-elf",
            Self::Pe => "application/x-msdownload",
            Self::UnknownBinary => "application/octet-stream",
        }
    }

    /// Whether this is the generic fallback type.
    pub fn is_unknown(self) -> bool {
        self == Self::UnknownBinary
    }

    /// Fixed risk scalar for the oracle's `file_type_risk` feature.
    pub fn risk(self) -> f64 {
        match self {
            Self::Elf | Self::Pe => 0.9,
            Self::Zip | Self::SevenZip | Self::Rar | Self::Gzip => 0.5,
            Self::Pdf => 0.4,
            Self::UnknownBinary => 0.6,
            Self::Png | Self::Jpeg | Self::Gif | Self::Bmp => 0.2,
        }
    }

    /// Expected type for a filename extension, if the extension is known.
    pub fn from_extension(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" | "jpe" | "jfif" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "pdf" => Some(Self::Pdf),
            "zip" | "docx" | "xlsx" | "pptx" | "jar" | "apk" | "odt" => Some(Self::Zip),
            "7z" => Some(Self::SevenZip),
            "rar" => Some(Self::Rar),
            "gz" | "tgz" => Some(Self::Gzip),
            "exe" | "dll" | "sys" => Some(Self::Pe),
            _ => None,
        }
    }

    /// Type for a caller-claimed MIME label, tolerating common aliases.
    pub fn from_mime(claimed: &str) -> Option<Self> {
        let base = claimed.split(';').next().unwrap_or("").trim();
        match base.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "application/pdf" => Some(Self::Pdf),
            "application/zip" | "application/x-zip-compressed" => Some(Self::Zip),
            "application/x-7z-compressed" => Some(Self::SevenZip),
            "application/vnd.rar" | "application/x-rar-compressed" => Some(Self::Rar),
            "application/gzip" | "application/x-gzip" => Some(Self::Gzip),
            "application/x-elf" | "application/x-executable" => Some(Self::Elf),
            "application/x-msdownload" | "application/vnd.microsoft.portable-executable" => {
                Some(Self::Pe)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime())
    }
}

/// Ordered magic-byte table, longest prefixes first.
const SIGNATURES: &[(&[u8], FileType)] = &[
    (b"\x89PNG\r\n\x1a\n", FileType::Png),
    (b"Rar!\x1a\x07\x01\x00", FileType::Rar),
    (b"Rar!\x1a\x07\x00", FileType::Rar),
    (b"7z\xbc\xaf\x27\x1c", FileType::SevenZip),
    (b"GIF87a", FileType::Gif),
    (b"GIF89a", FileType::Gif),
    (b"%PDF-", FileType::Pdf),
    (b"PK\x03\x04", FileType::Zip),
    (b"PK\x05\x06", FileType::Zip),
    (b"PK\x07\x08", FileType::Zip),
    (b"\x7fELF", FileType::Elf),
    (b"\xff\xd8\xff", FileType::Jpeg),
    (b"\x1f\x8b", FileType::Gzip),
    (b"MZ", FileType::Pe),
    (b"BM", FileType::Bmp),
];

/// Detect the type of a buffer from its leading bytes.
///
/// Never fails: an unmatched buffer is [`FileType::UnknownBinary`].
pub fn detect(data: &[u8]) -> FileType {
    SIGNATURES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|&(_, kind)| kind)
        .unwrap_or(FileType::UnknownBinary)
}

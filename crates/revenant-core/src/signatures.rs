//! Extension prediction from file signatures.
//!
//! When a deleted entry's recorded name lost its extension, the first sector
//! of the file usually still starts with a recognizable magic number. The
//! table is closed: anything unmatched falls back to `bin`.

use crate::device::SectorReader;

/// Hex-encoded signature prefixes mapped to extensions. First match wins;
/// prefixes may be shorter than four bytes.
const SIGNATURE_TABLE: &[(&str, &str)] = &[
    // Images
    ("ffd8ff", "jpg"),
    ("89504e47", "png"),
    ("47494638", "gif"),
    ("424d", "bmp"),
    ("49492a00", "tif"),
    ("4d4d002a", "tif"),
    // Documents
    ("25504446", "pdf"),
    ("504b0304", "zip"),
    ("d0cf11e0", "doc"),
    ("7b5c7274", "rtf"),
    // Audio / video
    ("494433", "mp3"),
    ("66747970", "mp4"),
    ("52494646", "wav"),
    ("4f676753", "ogg"),
    // Executables
    ("4d5a", "exe"),
    ("7f454c46", "elf"),
    // Archives
    ("526172", "rar"),
    ("1f8b08", "gz"),
    ("425a68", "bz2"),
    ("377abcaf", "7z"),
    // Database
    ("53514c69", "sqlite"),
    // Markup
    ("3c3f786d", "xml"),
    ("7b0d0a20", "json"),
    ("3c21444f", "html"),
    // Fonts
    ("4f54544f", "otf"),
    ("00010000", "ttf"),
];

/// Fallback when nothing in the table matches.
pub const DEFAULT_EXTENSION: &str = "bin";

/// Hex-encode the first four bytes of `data`.
pub fn signature_hex(data: &[u8]) -> String {
    data.iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Guess an extension from the leading bytes of a file.
pub fn extension_for(data: &[u8]) -> &'static str {
    // RIFF is a container: WEBP and WAVE share the same four-byte prefix,
    // the form tag at offset 8 tells them apart.
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "webp";
    }

    let signature = signature_hex(data);
    for (prefix, extension) in SIGNATURE_TABLE {
        if signature.starts_with(prefix) {
            return extension;
        }
    }
    DEFAULT_EXTENSION
}

/// Read the first sector of a file and predict its extension.
///
/// A failed read predicts nothing better than the fallback.
pub fn predict_extension(
    reader: &mut dyn SectorReader,
    first_sector: u64,
    bytes_per_sector: u32,
) -> String {
    let mut buf = vec![0u8; bytes_per_sector as usize];
    if !reader.read_sector(first_sector, &mut buf) {
        tracing::warn!(
            "failed to read sector {} for extension prediction",
            first_sector
        );
        return DEFAULT_EXTENSION.to_string();
    }
    extension_for(&buf).to_string()
}

/// Whether a recorded extension looks trustworthy: non-empty and purely
/// alphanumeric. Anything else triggers prediction.
pub fn is_plausible_extension(extension: &str) -> bool {
    !extension.is_empty() && extension.chars().all(|c| c.is_ascii_alphanumeric())
}

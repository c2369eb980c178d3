//! Filesystem identification and engine dispatch.

use anyhow::Result;

use crate::device::SectorReader;
use crate::error::RecoveryError;
use crate::fs;
use crate::FileSystemType;

/// Ask the reader for the volume's filesystem label and map it to an
/// engine. Anything outside the three supported labels is fatal.
pub fn probe(reader: &mut dyn SectorReader) -> Result<FileSystemType, RecoveryError> {
    let label = reader.filesystem_label();
    tracing::info!("volume reports filesystem label {:?}", label);

    match label.as_str() {
        "FAT32" => Ok(FileSystemType::Fat32),
        "exFAT" => Ok(FileSystemType::ExFat),
        "NTFS" => Ok(FileSystemType::Ntfs),
        other => Err(RecoveryError::UnsupportedFilesystem(other.to_string())),
    }
}

/// Human-readable summary of the probed filesystem.
pub fn filesystem_info(
    reader: &mut dyn SectorReader,
    fs_type: FileSystemType,
) -> Result<String> {
    match fs_type {
        FileSystemType::Fat32 => fs::fat32::filesystem_info(reader),
        FileSystemType::ExFat => fs::exfat::filesystem_info(reader),
        FileSystemType::Ntfs => fs::ntfs::filesystem_info(reader),
    }
}

//! Read-only sector access to a volume.
//!
//! The volume is never written: the handle is opened read-only and the only
//! control performed is seeking. Every write target of the tool lives under
//! the output directory, which must reside on a different volume.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::RecoveryError;

/// Default sector size assumed until a boot sector says otherwise.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

const NTFS_TAG: &[u8; 8] = b"NTFS    ";
const EXFAT_TAG: &[u8; 8] = b"EXFAT   ";
const FAT32_TAG: &[u8; 5] = b"FAT32";

// Identifier offsets inside the boot sector.
const OEM_TAG_OFFSET: usize = 0x03;
const FAT32_TAG_OFFSET: usize = 0x52;

/// Read-only random access to fixed-size sectors.
///
/// Implementations must tolerate partial failure: `read_sector` reports
/// failure through its return value so callers can log and skip a sector
/// instead of aborting a scan.
pub trait SectorReader {
    /// Read the sector at `sector` into `buf` (whose length is the sector
    /// size). Retries once on a short read, then returns false.
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> bool;

    fn bytes_per_sector(&self) -> u32;

    /// Filesystem label of the volume: `"FAT32"`, `"exFAT"`, `"NTFS"` or
    /// `"UNKNOWN"`.
    fn filesystem_label(&mut self) -> String;

    /// Total number of MFT records on an NTFS volume. 0 when the reader
    /// cannot tell; the NTFS engine then derives the count from the MFT's
    /// own record.
    fn total_mft_records(&self) -> u64 {
        0
    }

    fn is_open(&self) -> bool;

    fn reopen(&mut self) -> bool;

    fn close(&mut self);
}

/// Sector reader over a block device node or a volume image file.
///
/// Acquisition is scoped: the handle is released when the reader drops, on
/// every exit path.
#[derive(Debug)]
pub struct VolumeReader {
    path: PathBuf,
    file: Option<File>,
    bytes_per_sector: u32,
}

impl VolumeReader {
    /// Open the volume read-only. Fails with `AccessDenied` when elevated
    /// privileges are required, `NotFound` when the path does not resolve.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecoveryError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(RecoveryError::from)?;
        Ok(VolumeReader {
            path,
            file: Some(file),
            bytes_per_sector: DEFAULT_SECTOR_SIZE,
        })
    }

    /// Override the sector size, for volumes with 4K-native sectors.
    pub fn with_sector_size(mut self, bytes_per_sector: u32) -> Self {
        self.bytes_per_sector = bytes_per_sector;
        self
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return false;
        }
        match read_full(file, buf) {
            Ok(()) => true,
            Err(_) => {
                // One retry before giving up on the sector.
                if file.seek(SeekFrom::Start(offset)).is_err() {
                    return false;
                }
                read_full(file, buf).is_ok()
            }
        }
    }
}

impl SectorReader for VolumeReader {
    fn read_sector(&mut self, sector: u64, buf: &mut [u8]) -> bool {
        let offset = sector * buf.len() as u64;
        self.read_at(offset, buf)
    }

    fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    fn filesystem_label(&mut self) -> String {
        let mut sector0 = vec![0u8; self.bytes_per_sector as usize];
        if !self.read_sector(0, &mut sector0) {
            return "UNKNOWN".to_string();
        }
        label_from_boot_sector(&sector0).to_string()
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn reopen(&mut self) -> bool {
        if self.file.is_some() {
            return true;
        }
        match File::open(&self.path) {
            Ok(file) => {
                self.file = Some(file);
                true
            }
            Err(e) => {
                tracing::warn!("reopen of {} failed: {}", self.path.display(), e);
                false
            }
        }
    }

    fn close(&mut self) {
        self.file = None;
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<()> {
    file.read_exact(buf)
}

/// Derive the filesystem label from the boot sector identifier tags.
///
/// NTFS and exFAT carry their tag in the OEM field at offset 3; FAT32
/// carries `"FAT32   "` at offset 0x52.
pub fn label_from_boot_sector(sector0: &[u8]) -> &'static str {
    if sector0.len() >= OEM_TAG_OFFSET + 8 {
        let oem = &sector0[OEM_TAG_OFFSET..OEM_TAG_OFFSET + 8];
        if oem == NTFS_TAG {
            return "NTFS";
        }
        if oem == EXFAT_TAG {
            return "exFAT";
        }
    }
    if sector0.len() >= FAT32_TAG_OFFSET + 5 && &sector0[FAT32_TAG_OFFSET..FAT32_TAG_OFFSET + 5] == FAT32_TAG
    {
        return "FAT32";
    }
    "UNKNOWN"
}

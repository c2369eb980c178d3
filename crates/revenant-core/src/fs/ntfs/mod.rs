//! NTFS filesystem support.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::device::SectorReader;

pub mod engine;
pub mod mft;
pub mod runlist;

pub use engine::NtfsEngine;

const NTFS_OEM: &[u8; 8] = b"NTFS    ";

/// NTFS boot sector, decoded from sector 0.
#[derive(Debug, Clone)]
pub struct NtfsBootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_cluster: u64,
    pub mirror_mft_cluster: u64,
    pub clusters_per_mft_record: i8,
}

impl NtfsBootSector {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 80 {
            anyhow::bail!("insufficient data for NTFS boot sector");
        }
        if &data[3..11] != NTFS_OEM {
            anyhow::bail!("not a valid NTFS volume");
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(11);
        let bytes_per_sector = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = cursor.read_u8()?;
        cursor.set_position(40);
        let total_sectors = cursor.read_u64::<LittleEndian>()?;
        let mft_cluster = cursor.read_u64::<LittleEndian>()?;
        let mirror_mft_cluster = cursor.read_u64::<LittleEndian>()?;
        let clusters_per_mft_record = cursor.read_u8()? as i8;

        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            anyhow::bail!("NTFS boot sector reports zero-sized geometry");
        }

        Ok(NtfsBootSector {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_cluster,
            mirror_mft_cluster,
            clusters_per_mft_record,
        })
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        u64::from(self.bytes_per_sector) * u64::from(self.sectors_per_cluster)
    }

    /// MFT record size. A negative `clusters_per_mft_record` encodes
    /// `1 << -x` bytes; a positive one counts clusters.
    pub fn mft_record_size(&self) -> u64 {
        if self.clusters_per_mft_record > 0 {
            self.clusters_per_mft_record as u64 * self.bytes_per_cluster()
        } else {
            1u64 << (-i32::from(self.clusters_per_mft_record))
        }
    }

    pub fn total_clusters(&self) -> u64 {
        self.total_sectors / u64::from(self.sectors_per_cluster)
    }
}

/// Human-readable boot-sector summary.
pub fn filesystem_info(reader: &mut dyn SectorReader) -> Result<String> {
    let mut sector0 = vec![0u8; reader.bytes_per_sector() as usize];
    if !reader.read_sector(0, &mut sector0) {
        anyhow::bail!("failed to read NTFS boot sector");
    }
    let boot = NtfsBootSector::parse(&sector0)?;

    Ok(format!(
        "NTFS File System\n\
         - Bytes per Sector: {}\n\
         - Sectors per Cluster: {}\n\
         - Total Sectors: {}\n\
         - Total Clusters: {}\n\
         - MFT Start Cluster: {}\n\
         - MFT Mirror Cluster: {}\n\
         - MFT Record Size: {} bytes",
        boot.bytes_per_sector,
        boot.sectors_per_cluster,
        boot.total_sectors,
        boot.total_clusters(),
        boot.mft_cluster,
        boot.mirror_mft_cluster,
        boot.mft_record_size(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_boot_sector() -> Vec<u8> {
        let mut data = vec![0u8; 512];
        data[3..11].copy_from_slice(b"NTFS    ");
        data[11..13].copy_from_slice(&512u16.to_le_bytes());
        data[13] = 8;
        data[40..48].copy_from_slice(&1_000_000u64.to_le_bytes());
        data[48..56].copy_from_slice(&4u64.to_le_bytes()); // MFT cluster
        data[56..64].copy_from_slice(&8u64.to_le_bytes());
        data[64] = 0xF6; // -10 => 1024-byte records
        data
    }

    #[test]
    fn negative_record_size_encoding() {
        let boot = NtfsBootSector::parse(&sample_boot_sector()).unwrap();
        assert_eq!(boot.mft_record_size(), 1024);
        assert_eq!(boot.bytes_per_cluster(), 4096);
        assert_eq!(boot.total_clusters(), 125_000);
    }

    #[test]
    fn positive_record_size_counts_clusters() {
        let mut data = sample_boot_sector();
        data[64] = 2;
        let boot = NtfsBootSector::parse(&data).unwrap();
        assert_eq!(boot.mft_record_size(), 2 * 4096);
    }

    #[test]
    fn non_ntfs_oem_is_rejected() {
        let mut data = sample_boot_sector();
        data[3..11].copy_from_slice(b"MSDOS5.0");
        assert!(NtfsBootSector::parse(&data).is_err());
    }
}

//! exFAT filesystem support.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::device::SectorReader;

pub mod directory;
pub mod engine;

pub use engine::ExFatEngine;

/// Filesystem name at offset 3 of the boot sector.
const EXFAT_SIGNATURE: &[u8; 8] = b"EXFAT   ";

pub const MIN_DATA_CLUSTER: u32 = 2;
pub const BAD_CLUSTER: u32 = 0xFFFF_FFF7;
/// FAT entries at or above this value terminate a chain.
pub const END_OF_CHAIN_MIN: u32 = 0xFFFF_FFF8;
pub const END_OF_CHAIN: u32 = 0xFFFF_FFFF;

/// exFAT boot sector, decoded from sector 0.
#[derive(Debug, Clone)]
pub struct ExFatBootSector {
    pub file_system_name: [u8; 8],
    pub volume_length: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub cluster_heap_offset: u32,
    pub cluster_count: u32,
    pub root_directory_cluster: u32,
    pub bytes_per_sector_shift: u8,
    pub sectors_per_cluster_shift: u8,
    pub number_of_fats: u8,
}

impl ExFatBootSector {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 512 {
            anyhow::bail!("insufficient data for exFAT boot sector");
        }

        let mut file_system_name = [0u8; 8];
        file_system_name.copy_from_slice(&data[3..11]);
        if &file_system_name != EXFAT_SIGNATURE {
            anyhow::bail!("not a valid exFAT volume");
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(64);
        let _partition_offset = cursor.read_u64::<LittleEndian>()?;
        let volume_length = cursor.read_u64::<LittleEndian>()?;
        let fat_offset = cursor.read_u32::<LittleEndian>()?;
        let fat_length = cursor.read_u32::<LittleEndian>()?;
        let cluster_heap_offset = cursor.read_u32::<LittleEndian>()?;
        let cluster_count = cursor.read_u32::<LittleEndian>()?;
        let root_directory_cluster = cursor.read_u32::<LittleEndian>()?;
        let _volume_serial = cursor.read_u32::<LittleEndian>()?;
        let _revision = cursor.read_u16::<LittleEndian>()?;
        let _volume_flags = cursor.read_u16::<LittleEndian>()?;
        let bytes_per_sector_shift = cursor.read_u8()?;
        let sectors_per_cluster_shift = cursor.read_u8()?;
        let number_of_fats = cursor.read_u8()?;

        if bytes_per_sector_shift < 9 || bytes_per_sector_shift > 12 {
            anyhow::bail!(
                "implausible bytes-per-sector shift {}",
                bytes_per_sector_shift
            );
        }

        Ok(ExFatBootSector {
            file_system_name,
            volume_length,
            fat_offset,
            fat_length,
            cluster_heap_offset,
            cluster_count,
            root_directory_cluster,
            bytes_per_sector_shift,
            sectors_per_cluster_shift,
            number_of_fats,
        })
    }

    pub fn bytes_per_sector(&self) -> u32 {
        1 << self.bytes_per_sector_shift
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        1 << self.sectors_per_cluster_shift
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        u64::from(self.bytes_per_sector()) * u64::from(self.sectors_per_cluster())
    }

    /// Volume size in bytes, the upper bound for any candidate's size.
    pub fn volume_bytes(&self) -> u64 {
        self.volume_length * u64::from(self.bytes_per_sector())
    }
}

/// Human-readable boot-sector summary.
pub fn filesystem_info(reader: &mut dyn SectorReader) -> Result<String> {
    let mut sector0 = vec![0u8; reader.bytes_per_sector() as usize];
    if !reader.read_sector(0, &mut sector0) {
        anyhow::bail!("failed to read exFAT boot sector");
    }
    let boot = ExFatBootSector::parse(&sector0)?;

    Ok(format!(
        "exFAT File System\n\
         - Bytes per Sector: {}\n\
         - Sectors per Cluster: {}\n\
         - Bytes per Cluster: {}\n\
         - Volume Size: {} MB\n\
         - Cluster Count: {}\n\
         - FAT Offset: sector {}\n\
         - FAT Length: {} sectors\n\
         - Cluster Heap Offset: sector {}\n\
         - Root Directory Cluster: {}",
        boot.bytes_per_sector(),
        boot.sectors_per_cluster(),
        boot.bytes_per_cluster(),
        boot.volume_bytes() / (1024 * 1024),
        boot.cluster_count,
        boot.fat_offset,
        boot.fat_length,
        boot.cluster_heap_offset,
        boot.root_directory_cluster,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_boot_sector() -> Vec<u8> {
        let mut data = vec![0u8; 512];
        data[3..11].copy_from_slice(b"EXFAT   ");
        data[72..80].copy_from_slice(&65536u64.to_le_bytes()); // volume length
        data[80..84].copy_from_slice(&24u32.to_le_bytes()); // fat offset
        data[84..88].copy_from_slice(&8u32.to_le_bytes()); // fat length
        data[88..92].copy_from_slice(&40u32.to_le_bytes()); // cluster heap offset
        data[92..96].copy_from_slice(&1024u32.to_le_bytes()); // cluster count
        data[96..100].copy_from_slice(&4u32.to_le_bytes()); // root dir cluster
        data[108] = 9; // 512 bytes/sector
        data[109] = 3; // 8 sectors/cluster
        data[110] = 1;
        data
    }

    #[test]
    fn boot_sector_shifts_expand() {
        let boot = ExFatBootSector::parse(&sample_boot_sector()).unwrap();
        assert_eq!(boot.bytes_per_sector(), 512);
        assert_eq!(boot.sectors_per_cluster(), 8);
        assert_eq!(boot.bytes_per_cluster(), 4096);
        assert_eq!(boot.root_directory_cluster, 4);
        assert_eq!(boot.volume_bytes(), 65536 * 512);
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let mut data = sample_boot_sector();
        data[3..11].copy_from_slice(b"NTFS    ");
        assert!(ExFatBootSector::parse(&data).is_err());
    }
}

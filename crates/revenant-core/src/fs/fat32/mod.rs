//! FAT32 filesystem support.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::device::SectorReader;

pub mod directory;
pub mod engine;

pub use engine::Fat32Engine;

/// Filesystem tag at offset 0x52 of the boot sector.
const FAT32_SIGNATURE: &[u8; 8] = b"FAT32   ";

/// First valid data cluster. Clusters 0 and 1 are reserved.
pub const MIN_DATA_CLUSTER: u32 = 2;
/// Bad-cluster marker in the FAT.
pub const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
/// FAT entries at or above this value terminate a chain.
pub const END_OF_CHAIN_MIN: u32 = 0x0FFF_FFF8;
/// Canonical end-of-chain value written by Windows.
pub const END_OF_CHAIN: u32 = 0x0FFF_FFFF;
/// FAT entries carry 28 significant bits.
pub const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// FAT32 Boot Parameter Block, decoded from sector 0.
#[derive(Debug, Clone)]
pub struct Fat32BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub total_sectors_32: u32,
    pub fat_size_32: u32,
    pub root_cluster: u32,
    pub file_system_type: [u8; 8],
}

impl Fat32BootSector {
    /// Decode the BPB from raw boot-sector bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 90 {
            anyhow::bail!("insufficient data for FAT32 boot sector");
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(11);
        let bytes_per_sector = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = cursor.read_u8()?;
        let reserved_sector_count = cursor.read_u16::<LittleEndian>()?;
        let num_fats = cursor.read_u8()?;
        let root_entry_count = cursor.read_u16::<LittleEndian>()?;
        let total_sectors_16 = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(32);
        let total_sectors_32 = cursor.read_u32::<LittleEndian>()?;
        let fat_size_32 = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(44);
        let root_cluster = cursor.read_u32::<LittleEndian>()?;

        let mut file_system_type = [0u8; 8];
        cursor.set_position(82);
        cursor.read_exact(&mut file_system_type)?;

        if &file_system_type != FAT32_SIGNATURE {
            anyhow::bail!("not a valid FAT32 volume");
        }
        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            anyhow::bail!("FAT32 boot sector reports zero-sized geometry");
        }

        Ok(Fat32BootSector {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            num_fats,
            root_entry_count,
            total_sectors_16,
            total_sectors_32,
            fat_size_32,
            root_cluster,
            file_system_type,
        })
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        u64::from(self.bytes_per_sector) * u64::from(self.sectors_per_cluster)
    }

    /// First sector of the first FAT.
    pub fn fat_start_sector(&self) -> u64 {
        u64::from(self.reserved_sector_count)
    }

    /// First sector of the data region.
    pub fn data_start_sector(&self) -> u64 {
        self.fat_start_sector() + u64::from(self.num_fats) * u64::from(self.fat_size_32)
    }

    pub fn total_sectors(&self) -> u64 {
        if self.total_sectors_32 != 0 {
            u64::from(self.total_sectors_32)
        } else {
            u64::from(self.total_sectors_16)
        }
    }

    /// Highest data-cluster index the volume can hold.
    pub fn max_cluster_count(&self) -> u32 {
        let root_dir_sectors = (u64::from(self.root_entry_count) * 32)
            .div_ceil(u64::from(self.bytes_per_sector));
        let overhead = self.data_start_sector() + root_dir_sectors;
        let data_sectors = self.total_sectors().saturating_sub(overhead);
        (data_sectors / u64::from(self.sectors_per_cluster)) as u32
    }
}

/// Human-readable boot-sector summary.
pub fn filesystem_info(reader: &mut dyn SectorReader) -> Result<String> {
    let mut sector0 = vec![0u8; reader.bytes_per_sector() as usize];
    if !reader.read_sector(0, &mut sector0) {
        anyhow::bail!("failed to read FAT32 boot sector");
    }
    let boot = Fat32BootSector::parse(&sector0)?;

    Ok(format!(
        "FAT32 File System\n\
         - Bytes per Sector: {}\n\
         - Sectors per Cluster: {}\n\
         - Reserved Sectors: {}\n\
         - FAT Count: {}\n\
         - FAT Size: {} sectors\n\
         - Root Directory Cluster: {}\n\
         - Total Sectors: {}\n\
         - Data Region Start: sector {}\n\
         - Cluster Count: {}",
        boot.bytes_per_sector,
        boot.sectors_per_cluster,
        boot.reserved_sector_count,
        boot.num_fats,
        boot.fat_size_32,
        boot.root_cluster,
        boot.total_sectors(),
        boot.data_start_sector(),
        boot.max_cluster_count(),
    ))
}

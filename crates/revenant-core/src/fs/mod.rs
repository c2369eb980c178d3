//! Filesystem engines and dispatch.
//!
//! The engine is chosen once at probe time; inside the per-sector loops all
//! calls are direct.

use crate::device::SectorReader;
use crate::error::RecoveryError;
use crate::{CandidateFile, FileSystemType};

pub mod exfat;
pub mod fat32;
pub mod ntfs;

pub use exfat::ExFatEngine;
pub use fat32::Fat32Engine;
pub use ntfs::NtfsEngine;

/// The recovery engine for the probed filesystem.
pub enum Engine {
    Fat32(Fat32Engine),
    ExFat(ExFatEngine),
    Ntfs(NtfsEngine),
}

impl Engine {
    /// Parse the boot sector and build the engine for `fs_type`.
    pub fn new(
        fs_type: FileSystemType,
        reader: &mut dyn SectorReader,
    ) -> Result<Self, RecoveryError> {
        match fs_type {
            FileSystemType::Fat32 => Ok(Engine::Fat32(Fat32Engine::new(reader)?)),
            FileSystemType::ExFat => Ok(Engine::ExFat(ExFatEngine::new(reader)?)),
            FileSystemType::Ntfs => Ok(Engine::Ntfs(NtfsEngine::new(reader)?)),
        }
    }

    pub fn fs_type(&self) -> FileSystemType {
        match self {
            Engine::Fat32(_) => FileSystemType::Fat32,
            Engine::ExFat(_) => FileSystemType::ExFat,
            Engine::Ntfs(_) => FileSystemType::Ntfs,
        }
    }

    /// Discover deleted entries, in on-disk walk order.
    pub fn scan(
        &mut self,
        reader: &mut dyn SectorReader,
    ) -> Result<Vec<CandidateFile>, RecoveryError> {
        match self {
            Engine::Fat32(engine) => engine.scan(reader),
            Engine::ExFat(engine) => engine.scan(reader),
            Engine::Ntfs(engine) => engine.scan(reader),
        }
    }

    pub fn bytes_per_sector(&self) -> u32 {
        match self {
            Engine::Fat32(engine) => engine.bytes_per_sector(),
            Engine::ExFat(engine) => engine.bytes_per_sector(),
            Engine::Ntfs(engine) => engine.bytes_per_sector(),
        }
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        match self {
            Engine::Fat32(engine) => engine.sectors_per_cluster(),
            Engine::ExFat(engine) => engine.sectors_per_cluster(),
            Engine::Ntfs(engine) => engine.sectors_per_cluster(),
        }
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        match self {
            Engine::Fat32(engine) => engine.bytes_per_cluster(),
            Engine::ExFat(engine) => engine.bytes_per_cluster(),
            Engine::Ntfs(engine) => engine.bytes_per_cluster(),
        }
    }

    /// First sector of a cluster (FAT32/exFAT) or an LCN (NTFS).
    pub fn cluster_to_sector(&self, cluster: u64) -> u64 {
        match self {
            Engine::Fat32(engine) => engine.cluster_to_sector(cluster as u32),
            Engine::ExFat(engine) => engine.cluster_to_sector(cluster as u32),
            Engine::Ntfs(engine) => engine.cluster_to_sector(cluster),
        }
    }

    /// Follow the allocation table one step. `None` past the end of the
    /// chain, on a bad-cluster mark, or for filesystems without a FAT.
    pub fn next_cluster(&mut self, reader: &mut dyn SectorReader, cluster: u32) -> Option<u32> {
        let next = match self {
            Engine::Fat32(engine) => engine.next_cluster(reader, cluster),
            Engine::ExFat(engine) => engine.next_cluster(reader, cluster),
            Engine::Ntfs(_) => return None,
        };
        if self.is_valid_cluster(u64::from(next)) {
            Some(next)
        } else {
            None
        }
    }

    /// Whether the allocation table marks the cluster as claimed by a live
    /// chain. Always false on NTFS, where no bitmap is consulted.
    pub fn is_cluster_in_use(&mut self, reader: &mut dyn SectorReader, cluster: u64) -> bool {
        let Ok(cluster) = u32::try_from(cluster) else {
            return false;
        };
        match self {
            Engine::Fat32(engine) => engine.is_cluster_in_use(reader, cluster),
            Engine::ExFat(engine) => engine.is_cluster_in_use(reader, cluster),
            Engine::Ntfs(_) => false,
        }
    }

    pub fn is_valid_cluster(&self, cluster: u64) -> bool {
        match self {
            Engine::Fat32(engine) => {
                u32::try_from(cluster).is_ok_and(|c| engine.is_valid_cluster(c))
            }
            Engine::ExFat(engine) => {
                u32::try_from(cluster).is_ok_and(|c| engine.is_valid_cluster(c))
            }
            Engine::Ntfs(engine) => cluster > 0 && cluster < engine.total_clusters(),
        }
    }
}

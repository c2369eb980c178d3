//! FAT32 deleted-entry discovery.

use std::collections::HashSet;

use super::directory::{self, DirEntry, ENTRY_SIZE};
use super::{Fat32BootSector, BAD_CLUSTER, END_OF_CHAIN, END_OF_CHAIN_MIN, FAT_ENTRY_MASK, MIN_DATA_CLUSTER};
use crate::device::SectorReader;
use crate::error::RecoveryError;
use crate::signatures;
use crate::{CandidateFile, FileLocation};

/// Directory descent is capped; deeper trees are truncated, not followed.
const MAX_RECURSION_DEPTH: u32 = 100;

/// Walks the FAT32 directory tree for deleted entries and resolves FAT
/// chains during recovery.
pub struct Fat32Engine {
    boot: Fat32BootSector,
    fat_start_sector: u64,
    data_start_sector: u64,
    root_dir_cluster: u32,
    max_cluster_count: u32,
    /// Last FAT sector read, kept to spare one read per chain step.
    fat_cache: Option<(u64, Vec<u8>)>,
}

impl Fat32Engine {
    pub fn new(reader: &mut dyn SectorReader) -> Result<Self, RecoveryError> {
        let mut sector0 = vec![0u8; reader.bytes_per_sector() as usize];
        if !reader.read_sector(0, &mut sector0) {
            return Err(RecoveryError::Parse(
                "failed to read FAT32 boot sector".into(),
            ));
        }
        let boot = Fat32BootSector::parse(&sector0)
            .map_err(|e| RecoveryError::Parse(e.to_string()))?;

        tracing::info!(
            "FAT32: {} bytes/sector, {} sectors/cluster, data region at sector {}",
            boot.bytes_per_sector,
            boot.sectors_per_cluster,
            boot.data_start_sector()
        );

        Ok(Fat32Engine {
            fat_start_sector: boot.fat_start_sector(),
            data_start_sector: boot.data_start_sector(),
            root_dir_cluster: boot.root_cluster,
            max_cluster_count: boot.max_cluster_count(),
            boot,
            fat_cache: None,
        })
    }

    pub fn bytes_per_sector(&self) -> u32 {
        u32::from(self.boot.bytes_per_sector)
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        u32::from(self.boot.sectors_per_cluster)
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.boot.bytes_per_cluster()
    }

    pub fn cluster_to_sector(&self, cluster: u32) -> u64 {
        self.data_start_sector
            + u64::from(cluster - MIN_DATA_CLUSTER) * u64::from(self.boot.sectors_per_cluster)
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= MIN_DATA_CLUSTER && cluster <= self.max_cluster_count && cluster < BAD_CLUSTER
    }

    /// Zero if the cluster reference cannot possibly be followed.
    fn sanitize_cluster(&self, cluster: u32) -> u32 {
        if self.is_valid_cluster(cluster) {
            cluster
        } else {
            0
        }
    }

    fn fat_entry(&mut self, reader: &mut dyn SectorReader, cluster: u32) -> Option<u32> {
        let bytes_per_sector = u64::from(self.boot.bytes_per_sector);
        let fat_offset = u64::from(cluster) * 4;
        let fat_sector = self.fat_start_sector + fat_offset / bytes_per_sector;
        let entry_offset = (fat_offset % bytes_per_sector) as usize;

        let cached = matches!(&self.fat_cache, Some((sector, _)) if *sector == fat_sector);
        if !cached {
            let mut buf = vec![0u8; bytes_per_sector as usize];
            if !reader.read_sector(fat_sector, &mut buf) {
                tracing::warn!("failed to read FAT sector {}", fat_sector);
                return None;
            }
            self.fat_cache = Some((fat_sector, buf));
        }

        let (_, buf) = self.fat_cache.as_ref()?;
        let raw = u32::from_le_bytes([
            buf[entry_offset],
            buf[entry_offset + 1],
            buf[entry_offset + 2],
            buf[entry_offset + 3],
        ]);
        Some(raw & FAT_ENTRY_MASK)
    }

    /// Next cluster in the chain. Returns `END_OF_CHAIN` past the last
    /// cluster or on a FAT read failure, `BAD_CLUSTER` for a bad mark.
    pub fn next_cluster(&mut self, reader: &mut dyn SectorReader, cluster: u32) -> u32 {
        let Some(entry) = self.fat_entry(reader, cluster) else {
            return END_OF_CHAIN;
        };
        if entry >= END_OF_CHAIN_MIN {
            if entry == END_OF_CHAIN {
                END_OF_CHAIN
            } else {
                BAD_CLUSTER
            }
        } else {
            entry
        }
    }

    /// Whether the FAT marks this cluster as belonging to a live chain.
    ///
    /// Free clusters read 0; a canonical end-of-chain value is what this
    /// file's own truncated chain leaves behind, so only other values count.
    pub fn is_cluster_in_use(&mut self, reader: &mut dyn SectorReader, cluster: u32) -> bool {
        match self.fat_entry(reader, cluster) {
            Some(entry) => entry != 0 && entry != END_OF_CHAIN,
            None => false,
        }
    }

    /// Depth-first walk from the root directory, collecting deleted entries.
    pub fn scan(
        &mut self,
        reader: &mut dyn SectorReader,
    ) -> Result<Vec<CandidateFile>, RecoveryError> {
        let mut candidates = Vec::new();
        let mut next_id: u16 = 1;
        let mut visited_dirs = HashSet::new();

        let root = self.root_dir_cluster;
        self.scan_directory(reader, root, 0, &mut next_id, &mut visited_dirs, &mut candidates);

        tracing::info!("FAT32 scan found {} deleted entries", candidates.len());
        Ok(candidates)
    }

    fn scan_directory(
        &mut self,
        reader: &mut dyn SectorReader,
        start_cluster: u32,
        depth: u32,
        next_id: &mut u16,
        visited_dirs: &mut HashSet<u32>,
        candidates: &mut Vec<CandidateFile>,
    ) {
        if depth >= MAX_RECURSION_DEPTH {
            tracing::warn!("maximum directory depth exceeded at cluster {}", start_cluster);
            return;
        }

        let entries_per_sector = self.boot.bytes_per_sector as usize / ENTRY_SIZE;
        let mut sector_buf = vec![0u8; self.boot.bytes_per_sector as usize];
        let mut long_name = String::new();

        let mut cluster = start_cluster;
        while self.is_valid_cluster(cluster) {
            if !visited_dirs.insert(cluster) {
                tracing::warn!("directory chain loop at cluster {}", cluster);
                return;
            }

            let first_sector = self.cluster_to_sector(cluster);
            for i in 0..u64::from(self.boot.sectors_per_cluster) {
                if !reader.read_sector(first_sector + i, &mut sector_buf) {
                    tracing::warn!("failed to read directory sector {}", first_sector + i);
                    continue;
                }

                for j in 0..entries_per_sector {
                    let raw = &sector_buf[j * ENTRY_SIZE..(j + 1) * ENTRY_SIZE];
                    let Ok(entry) = DirEntry::parse(raw) else {
                        continue;
                    };

                    if entry.is_end_of_directory() {
                        return;
                    }

                    if entry.is_long_name() {
                        // LFN entries precede the short entry in reverse
                        // order: prepend each fragment.
                        long_name = format!("{}{}", directory::long_name_fragment(raw), long_name);
                        continue;
                    }

                    let filename = if long_name.is_empty() {
                        entry.short_name()
                    } else {
                        std::mem::take(&mut long_name)
                    };

                    self.process_entry(
                        reader,
                        &entry,
                        filename,
                        depth,
                        next_id,
                        visited_dirs,
                        candidates,
                    );
                }
            }

            let next = self.next_cluster(reader, cluster);
            if !self.is_valid_cluster(next) || next == cluster {
                break;
            }
            cluster = next;
        }
    }

    fn process_entry(
        &mut self,
        reader: &mut dyn SectorReader,
        entry: &DirEntry,
        filename: String,
        depth: u32,
        next_id: &mut u16,
        visited_dirs: &mut HashSet<u32>,
        candidates: &mut Vec<CandidateFile>,
    ) {
        let cluster = self.sanitize_cluster(entry.first_cluster());
        if cluster == 0 {
            return;
        }

        if entry.is_directory() && !entry.is_dot_entry() {
            self.scan_directory(reader, cluster, depth + 1, next_id, visited_dirs, candidates);
            return;
        }

        if !entry.is_deleted() || entry.file_size == 0 || filename.is_empty() {
            return;
        }

        let (display_name, predicted) = self.resolve_name(reader, &filename, cluster);

        tracing::debug!(
            "FAT32 deleted entry #{} \"{}\" at cluster {} ({} bytes)",
            *next_id,
            display_name,
            cluster,
            entry.file_size
        );

        candidates.push(CandidateFile {
            file_id: *next_id,
            display_name,
            size_bytes: u64::from(entry.file_size),
            location: FileLocation::FatChain {
                first_cluster: cluster,
            },
            extension_was_predicted: predicted,
        });
        *next_id = next_id.saturating_add(1);
    }

    /// Split the recorded name; when the extension is missing or implausible,
    /// predict one from the file's first sector.
    fn resolve_name(
        &mut self,
        reader: &mut dyn SectorReader,
        filename: &str,
        cluster: u32,
    ) -> (String, bool) {
        let clean: String = filename.chars().filter(|&c| c != '\0').collect();

        let dot = clean.rfind('.').filter(|&p| p != 0);
        if let Some(pos) = dot {
            let extension = &clean[pos + 1..];
            if signatures::is_plausible_extension(extension) {
                return (clean, false);
            }
            let stem = clean[..pos].to_string();
            let predicted = self.predict_extension(reader, cluster);
            return (format!("{}.{}", stem, predicted), true);
        }

        let predicted = self.predict_extension(reader, cluster);
        (format!("{}.{}", clean, predicted), true)
    }

    fn predict_extension(&self, reader: &mut dyn SectorReader, cluster: u32) -> String {
        signatures::predict_extension(
            reader,
            self.cluster_to_sector(cluster),
            u32::from(self.boot.bytes_per_sector),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::MemoryVolume;

    fn small_volume() -> MemoryVolume {
        // 512-byte sectors, 8 per cluster, 1 FAT of 4 sectors, 8 reserved.
        MemoryVolume::fat32(512, 8, 8, 4)
    }

    #[test]
    fn deleted_entry_becomes_candidate() {
        let mut volume = small_volume();
        volume.add_dir_entry(2, b"\xE5ELLO   TXT", 0x20, 10, 48);
        volume.set_fat_entry(10, 0x0FFF_FFFF);
        volume.fill_cluster(10, b"plain text, nothing magic about it");

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        let candidates = engine.scan(&mut volume).unwrap();

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.file_id, 1);
        assert_eq!(c.display_name, "_ELLO.TXT");
        assert_eq!(c.size_bytes, 48);
        assert_eq!(
            c.location,
            FileLocation::FatChain { first_cluster: 10 }
        );
        assert!(!c.extension_was_predicted);
    }

    #[test]
    fn live_entries_are_not_reported() {
        let mut volume = small_volume();
        volume.add_dir_entry(2, b"ALIVE   TXT", 0x20, 10, 48);
        volume.set_fat_entry(10, 0x0FFF_FFFF);

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        assert!(engine.scan(&mut volume).unwrap().is_empty());
    }

    #[test]
    fn empty_directory_yields_no_candidates() {
        let mut volume = small_volume();
        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        assert!(engine.scan(&mut volume).unwrap().is_empty());
    }

    #[test]
    fn lfn_fragments_reassemble_before_short_entry() {
        let mut volume = small_volume();
        // On disk the last logical fragment comes first, ordinal 0x40-flagged.
        volume.add_lfn_entry(2, 0x42, "name.txt");
        volume.add_lfn_entry(2, 0x01, "a long file ");
        volume.add_dir_entry(2, b"\xE5LONGFI TXT", 0x20, 10, 512);
        volume.set_fat_entry(10, 0x0FFF_FFFF);

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        let candidates = engine.scan(&mut volume).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].display_name, "a long file name.txt");
    }

    #[test]
    fn missing_extension_is_predicted_from_content() {
        let mut volume = small_volume();
        volume.add_dir_entry(2, b"\xE5ICTURE    ", 0x20, 10, 1024);
        volume.set_fat_entry(10, 0x0FFF_FFFF);
        volume.fill_cluster(10, &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        let candidates = engine.scan(&mut volume).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].display_name, "_ICTURE.jpg");
        assert!(candidates[0].extension_was_predicted);
    }

    #[test]
    fn subdirectories_are_descended() {
        let mut volume = small_volume();
        // Live subdirectory at cluster 5 holding one deleted file.
        volume.add_dir_entry(2, b"SUBDIR     ", 0x10, 5, 0);
        volume.set_fat_entry(5, 0x0FFF_FFFF);
        volume.add_dir_entry(5, b"\xE5OTES   MD ", 0x20, 20, 100);
        volume.set_fat_entry(20, 0x0FFF_FFFF);
        volume.fill_cluster(20, b"# notes");

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        let candidates = engine.scan(&mut volume).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].display_name, "_OTES.MD");
    }

    #[test]
    fn chain_walk_follows_fat_and_terminates() {
        let mut volume = small_volume();
        volume.set_fat_entry(10, 11);
        volume.set_fat_entry(11, 12);
        volume.set_fat_entry(12, 0x0FFF_FFFF);

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        assert_eq!(engine.next_cluster(&mut volume, 10), 11);
        assert_eq!(engine.next_cluster(&mut volume, 11), 12);
        assert_eq!(engine.next_cluster(&mut volume, 12), END_OF_CHAIN);
    }

    #[test]
    fn bad_cluster_mark_is_surfaced() {
        let mut volume = small_volume();
        volume.set_fat_entry(10, 0x0FFF_FFF7);
        // Values in the reserved terminator band also read as bad.
        volume.set_fat_entry(11, 0x0FFF_FFF8);

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        assert_eq!(engine.next_cluster(&mut volume, 10), BAD_CLUSTER);
        assert_eq!(engine.next_cluster(&mut volume, 11), BAD_CLUSTER);
    }

    #[test]
    fn cluster_in_use_distinguishes_free_and_chained() {
        let mut volume = small_volume();
        volume.set_fat_entry(10, 0); // free
        volume.set_fat_entry(11, 12); // chained onward
        volume.set_fat_entry(12, 0x0FFF_FFFF); // own end of chain

        let mut engine = Fat32Engine::new(&mut volume).unwrap();
        assert!(!engine.is_cluster_in_use(&mut volume, 10));
        assert!(engine.is_cluster_in_use(&mut volume, 11));
        assert!(!engine.is_cluster_in_use(&mut volume, 12));
    }

    #[test]
    fn cluster_to_sector_mapping_is_linear() {
        let mut volume = small_volume();
        let engine = Fat32Engine::new(&mut volume).unwrap();
        let base = engine.cluster_to_sector(2);
        assert!(base >= engine.data_start_sector);
        assert_eq!(
            engine.cluster_to_sector(3) - engine.cluster_to_sector(2),
            u64::from(engine.boot.sectors_per_cluster)
        );
        assert_eq!(base, engine.data_start_sector);
    }
}

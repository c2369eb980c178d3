//! exFAT deleted-entry discovery.

use std::collections::HashSet;

use super::directory::{self, FileEntry, StreamExtensionEntry, ENTRY_SIZE};
use super::{ExFatBootSector, BAD_CLUSTER, END_OF_CHAIN, END_OF_CHAIN_MIN, MIN_DATA_CLUSTER};
use crate::device::SectorReader;
use crate::error::RecoveryError;
use crate::{CandidateFile, FileLocation};

const MAX_RECURSION_DEPTH: u32 = 100;

/// State of the entry-set accumulator while walking a directory.
#[derive(Debug, Default)]
struct PendingSet {
    active: bool,
    in_use: bool,
    is_directory: bool,
    name: String,
    name_length: u8,
    first_cluster: u32,
    data_length: u64,
    no_fat_chain: bool,
    has_stream: bool,
}

/// Walks exFAT directory entry sets for deleted files and resolves cluster
/// chains during recovery.
pub struct ExFatEngine {
    boot: ExFatBootSector,
    fat_cache: Option<(u64, Vec<u8>)>,
}

impl ExFatEngine {
    pub fn new(reader: &mut dyn SectorReader) -> Result<Self, RecoveryError> {
        let mut sector0 = vec![0u8; reader.bytes_per_sector() as usize];
        if !reader.read_sector(0, &mut sector0) {
            return Err(RecoveryError::Parse(
                "failed to read exFAT boot sector".into(),
            ));
        }
        let boot = ExFatBootSector::parse(&sector0)
            .map_err(|e| RecoveryError::Parse(e.to_string()))?;

        tracing::info!(
            "exFAT: {} bytes/sector, {} sectors/cluster, {} clusters, root at {}",
            boot.bytes_per_sector(),
            boot.sectors_per_cluster(),
            boot.cluster_count,
            boot.root_directory_cluster
        );

        Ok(ExFatEngine {
            boot,
            fat_cache: None,
        })
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.boot.bytes_per_sector()
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.boot.sectors_per_cluster()
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.boot.bytes_per_cluster()
    }

    pub fn cluster_to_sector(&self, cluster: u32) -> u64 {
        u64::from(self.boot.cluster_heap_offset)
            + u64::from(cluster - MIN_DATA_CLUSTER) * u64::from(self.boot.sectors_per_cluster())
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= MIN_DATA_CLUSTER && cluster <= self.boot.cluster_count && cluster < BAD_CLUSTER
    }

    fn fat_entry(&mut self, reader: &mut dyn SectorReader, cluster: u32) -> Option<u32> {
        let bytes_per_sector = u64::from(self.boot.bytes_per_sector());
        let fat_offset = u64::from(cluster) * 4;
        let fat_sector = u64::from(self.boot.fat_offset) + fat_offset / bytes_per_sector;
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
        Some(u32::from_le_bytes([
            buf[entry_offset],
            buf[entry_offset + 1],
            buf[entry_offset + 2],
            buf[entry_offset + 3],
        ]))
    }

    /// Next cluster in the chain, `END_OF_CHAIN` past the last cluster or on
    /// a FAT read failure, `BAD_CLUSTER` for a bad mark.
    pub fn next_cluster(&mut self, reader: &mut dyn SectorReader, cluster: u32) -> u32 {
        let Some(entry) = self.fat_entry(reader, cluster) else {
            return END_OF_CHAIN;
        };
        if entry >= END_OF_CHAIN_MIN {
            END_OF_CHAIN
        } else if entry == BAD_CLUSTER {
            BAD_CLUSTER
        } else {
            entry
        }
    }

    /// Whether the FAT marks this cluster as belonging to a live chain.
    pub fn is_cluster_in_use(&mut self, reader: &mut dyn SectorReader, cluster: u32) -> bool {
        match self.fat_entry(reader, cluster) {
            Some(entry) => entry != 0 && entry != END_OF_CHAIN,
            None => false,
        }
    }

    /// Walk the directory tree from the root cluster, collecting deleted
    /// entry sets.
    pub fn scan(
        &mut self,
        reader: &mut dyn SectorReader,
    ) -> Result<Vec<CandidateFile>, RecoveryError> {
        let mut candidates = Vec::new();
        let mut next_id: u16 = 1;
        let mut visited_dirs = HashSet::new();

        let root = self.boot.root_directory_cluster;
        self.scan_directory(reader, root, 0, &mut next_id, &mut visited_dirs, &mut candidates);

        tracing::info!("exFAT scan found {} deleted entry sets", candidates.len());
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

        let entries_per_sector = self.boot.bytes_per_sector() as usize / ENTRY_SIZE;
        let mut sector_buf = vec![0u8; self.boot.bytes_per_sector() as usize];
        let mut pending = PendingSet::default();

        let mut cluster = start_cluster;
        'chain: while self.is_valid_cluster(cluster) {
            if !visited_dirs.insert(cluster) {
                tracing::warn!("directory chain loop at cluster {}", cluster);
                break;
            }

            let first_sector = self.cluster_to_sector(cluster);
            for i in 0..u64::from(self.boot.sectors_per_cluster()) {
                if !reader.read_sector(first_sector + i, &mut sector_buf) {
                    tracing::warn!("failed to read directory sector {}", first_sector + i);
                    continue;
                }

                for j in 0..entries_per_sector {
                    let raw = &sector_buf[j * ENTRY_SIZE..(j + 1) * ENTRY_SIZE];
                    let entry_type = raw[0];

                    if entry_type == directory::TYPE_END_OF_DIRECTORY {
                        break 'chain;
                    }

                    self.process_record(raw, entry_type, &mut pending, |engine, set| {
                        engine.finalize_set(
                            reader,
                            set,
                            depth,
                            next_id,
                            visited_dirs,
                            candidates,
                        );
                    });
                }
            }

            let next = self.next_cluster(reader, cluster);
            if !self.is_valid_cluster(next) || next == cluster {
                break;
            }
            cluster = next;
        }

        if pending.active {
            self.finalize_set(reader, &mut pending, depth, next_id, visited_dirs, candidates);
        }
    }

    /// Advance the entry-set state machine by one 32-byte record.
    fn process_record(
        &mut self,
        raw: &[u8],
        entry_type: u8,
        pending: &mut PendingSet,
        mut finalize: impl FnMut(&mut Self, &mut PendingSet),
    ) {
        let in_use = directory::is_in_use(entry_type);

        if directory::is_file_entry(entry_type) {
            if pending.active {
                finalize(self, pending);
            }
            match FileEntry::parse(raw) {
                Ok(file) => {
                    *pending = PendingSet {
                        active: true,
                        in_use,
                        is_directory: file.is_directory(),
                        ..PendingSet::default()
                    };
                }
                Err(e) => {
                    tracing::debug!("unparseable file entry: {}", e);
                    *pending = PendingSet::default();
                }
            }
            return;
        }

        // Secondary records only extend a set whose in-use state matches;
        // a mismatch means the set was partially reused.
        if !pending.active || in_use != pending.in_use {
            return;
        }

        if directory::is_stream_extension(entry_type) {
            if let Ok(stream) = StreamExtensionEntry::parse(raw) {
                pending.first_cluster = stream.first_cluster;
                pending.data_length = stream.data_length;
                pending.no_fat_chain = stream.is_contiguous();
                pending.name_length = stream.name_length;
                pending.has_stream = true;
            }
        } else if directory::is_file_name(entry_type) {
            pending.name.push_str(&directory::name_fragment(raw));
        }
    }

    fn finalize_set(
        &mut self,
        reader: &mut dyn SectorReader,
        pending: &mut PendingSet,
        depth: u32,
        next_id: &mut u16,
        visited_dirs: &mut HashSet<u32>,
        candidates: &mut Vec<CandidateFile>,
    ) {
        let set = std::mem::take(pending);
        if !set.active || !set.has_stream {
            return;
        }

        if !self.is_valid_cluster(set.first_cluster) {
            return;
        }

        if set.is_directory {
            // Subdirectories descend whether live or deleted; a deleted
            // directory's records are still on disk.
            self.scan_directory(
                reader,
                set.first_cluster,
                depth + 1,
                next_id,
                visited_dirs,
                candidates,
            );
            return;
        }

        if set.in_use {
            return;
        }

        let mut name = set.name;
        if set.name_length > 0 && name.chars().count() > set.name_length as usize {
            name = name.chars().take(set.name_length as usize).collect();
        }

        if name.is_empty() || set.data_length == 0 || set.data_length > self.boot.volume_bytes() {
            tracing::debug!(
                "skipping invalid entry set at cluster {} ({} bytes)",
                set.first_cluster,
                set.data_length
            );
            return;
        }

        let location = if set.no_fat_chain {
            FileLocation::ExfatContiguous {
                first_cluster: set.first_cluster,
                length_clusters: set.data_length.div_ceil(self.bytes_per_cluster()),
            }
        } else {
            FileLocation::FatChain {
                first_cluster: set.first_cluster,
            }
        };

        tracing::debug!(
            "exFAT deleted entry #{} \"{}\" at cluster {} ({} bytes)",
            *next_id,
            name,
            set.first_cluster,
            set.data_length
        );

        candidates.push(CandidateFile {
            file_id: *next_id,
            display_name: name,
            size_bytes: set.data_length,
            location,
            extension_was_predicted: false,
        });
        *next_id = next_id.saturating_add(1);
    }
}

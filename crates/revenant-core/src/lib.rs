use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod config;
pub mod device;
pub mod error;
pub mod fs;
pub mod history;
pub mod probe;
pub mod recovery;
pub mod signatures;

// Re-export the types callers touch on every run.
pub use config::Config;
pub use device::{SectorReader, VolumeReader};
pub use error::RecoveryError;
pub use fs::Engine;
pub use history::AllocationHistory;
pub use recovery::{FileOutcome, ProgressEvent, RecoveryDriver, RecoveryReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSystemType {
    Fat32,
    ExFat,
    Ntfs,
}

impl std::fmt::Display for FileSystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSystemType::Fat32 => write!(f, "FAT32"),
            FileSystemType::ExFat => write!(f, "exFAT"),
            FileSystemType::Ntfs => write!(f, "NTFS"),
        }
    }
}

/// One extent of an NTFS non-resident attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRun {
    /// Absolute logical cluster number of the first cluster. `None` marks
    /// a sparse run: no clusters on disk, the stream reads as zeros there.
    pub lcn: Option<u64>,
    /// Number of clusters in the run.
    pub length_clusters: u64,
}

/// Where a candidate's data lives on the volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileLocation {
    /// FAT32 or exFAT data reached by following the allocation table
    /// cluster by cluster.
    FatChain { first_cluster: u32 },
    /// exFAT stream with the NoFatChain flag: one contiguous run, no table
    /// entries to follow.
    ExfatContiguous {
        first_cluster: u32,
        length_clusters: u64,
    },
    /// NTFS non-resident data described by a decoded run list.
    NtfsNonResident { runs: Vec<ClusterRun> },
    /// NTFS resident data carried inside the MFT record itself.
    NtfsResident { bytes: Vec<u8> },
}

impl FileLocation {
    /// Starting cluster for location kinds that have one.
    pub fn first_cluster(&self) -> Option<u32> {
        match self {
            FileLocation::FatChain { first_cluster }
            | FileLocation::ExfatContiguous { first_cluster, .. } => Some(*first_cluster),
            FileLocation::NtfsNonResident { runs } => runs
                .iter()
                .find_map(|r| r.lcn)
                .and_then(|lcn| u32::try_from(lcn).ok()),
            FileLocation::NtfsResident { .. } => None,
        }
    }
}

/// The uniform record every filesystem engine produces for a deleted entry.
///
/// `file_id` is assigned in discovery order starting at 1; it is the handle
/// the log, the selection prompt and the allocation history all refer to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFile {
    pub file_id: u16,
    /// Name as recorded on disk, decoded from UTF-16. For FAT 8.3 entries
    /// the erased first byte is shown as `_`.
    pub display_name: String,
    pub size_bytes: u64,
    pub location: FileLocation,
    pub extension_was_predicted: bool,
}

/// Chain-validation verdict carried from the analyzer to the emitter and
/// into reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub corrupted: bool,
    pub fragmented: bool,
    pub fragmentation_score: f64,
    pub has_back_jumps: bool,
    pub back_jumps: u32,
    pub has_repeated_clusters: bool,
    pub repeated_clusters: u32,
    pub has_large_gaps: bool,
    pub large_gaps: u32,
    pub overwritten: bool,
    pub invalid_name: bool,
    pub invalid_extension: bool,
    pub expected_clusters: u64,
    pub recovered_clusters: u64,
    pub recovered_bytes: u64,
    pub problematic_clusters: Vec<u64>,
}

impl RecoveryStatus {
    /// Folds the individual findings into the aggregate flag.
    pub fn aggregate(&mut self) {
        if self.fragmented
            || self.has_back_jumps
            || self.has_repeated_clusters
            || self.has_large_gaps
            || self.overwritten
            || self.invalid_name
            || self.invalid_extension
        {
            self.corrupted = true;
        }
    }
}

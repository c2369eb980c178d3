//! Corruption analysis of reconstructed cluster chains.
//!
//! A chain recovered for a deleted file should be a mostly-ascending,
//! mostly-contiguous cluster sequence. Repeats, backward jumps and very
//! large gaps all point at allocation metadata that has been reused since
//! deletion.

use std::collections::BTreeMap;

use crate::history::AllocationHistory;
use crate::RecoveryStatus;

/// Below this chain length no fragmentation score is computed.
pub const MIN_CLUSTERS_FOR_ANALYSIS: usize = 10;
/// A forward gap of at least this many clusters counts as a large gap.
pub const LARGE_GAP_THRESHOLD: u64 = 1000;
/// Fraction of anomalous pairs above which a pattern is suspicious.
pub const SUSPICIOUS_PATTERN_FRACTION: f64 = 0.10;
/// Fragmentation score above which the chain counts as severely fragmented.
pub const SEVERE_FRAGMENTATION_FRACTION: f64 = 0.25;
/// Fraction of out-of-range code points above which a name is corrupted.
pub const FILENAME_CORRUPTION_FRACTION: f64 = 0.50;

const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Walk consecutive cluster pairs, counting repeats, backward jumps and
/// large gaps, and derive the fragmentation score and the pattern flags.
pub fn analyze_cluster_pattern(chain: &[u64], status: &mut RecoveryStatus) {
    if chain.len() < MIN_CLUSTERS_FOR_ANALYSIS {
        return;
    }

    let mut anomalies = 0u32;

    for pair in chain.windows(2) {
        let (prev, next) = (pair[0], pair[1]);

        if next == prev {
            status.repeated_clusters += 1;
            anomalies += 1;
            continue;
        }

        if next < prev {
            status.back_jumps += 1;
            anomalies += 1;
            continue;
        }

        let gap = next - prev - 1;
        if gap >= LARGE_GAP_THRESHOLD {
            status.large_gaps += 1;
            anomalies += 1;
        }
    }

    let total_pairs = (chain.len() - 1) as f64;
    status.fragmentation_score = (f64::from(anomalies) / total_pairs).min(1.0);

    status.has_large_gaps = f64::from(status.large_gaps) > total_pairs * SUSPICIOUS_PATTERN_FRACTION;
    status.has_back_jumps = f64::from(status.back_jumps) > total_pairs * SUSPICIOUS_PATTERN_FRACTION;
    status.fragmented = status.fragmentation_score > SEVERE_FRAGMENTATION_FRACTION;
    status.has_repeated_clusters = status.repeated_clusters > 0;

    status.aggregate();
}

/// A filename is corrupted when it is empty, contains a reserved character,
/// or more than half its code points fall outside printable ASCII
/// ([32, 127]).
pub fn is_file_name_corrupted(name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    if name.contains(INVALID_NAME_CHARS) {
        return true;
    }

    let mut outside = 0usize;
    let mut total = 0usize;
    for c in name.chars() {
        total += 1;
        let code = c as u32;
        if !(32..=127).contains(&code) {
            outside += 1;
        }
    }

    (outside as f64) > (total as f64) * FILENAME_CORRUPTION_FRACTION
}

/// Result of checking one candidate's chain against the allocation history.
#[derive(Debug, Default)]
pub struct OverwriteAnalysis {
    pub overwritten_clusters: Vec<u64>,
    /// Cluster to the file ids that also claimed it.
    pub overwritten_by: BTreeMap<u64, Vec<u16>>,
    /// Fraction of the expected clusters that were claimed elsewhere.
    pub overwrite_fraction: f64,
}

impl OverwriteAnalysis {
    pub fn has_overwrite(&self) -> bool {
        !self.overwritten_clusters.is_empty()
    }
}

/// Record this candidate's claims on the chain and check each cluster
/// against every other claimant.
///
/// The record call runs first, so as soon as two candidates share a
/// cluster the later one sees the overlapping pair. Pairs never mix usages
/// of a single file.
pub fn analyze_cluster_overwrites(
    chain: &[u64],
    file_id: u16,
    bytes_per_cluster: u64,
    expected_size: u64,
    history: &mut AllocationHistory,
) -> OverwriteAnalysis {
    let mut analysis = OverwriteAnalysis::default();
    let expected_clusters = expected_size.div_ceil(bytes_per_cluster).max(1);

    let mut offset = 0u64;
    for &cluster in chain {
        if offset >= expected_size {
            break;
        }

        history.record(cluster, file_id, offset);

        let overlaps = history.overlapping_usages(cluster);
        if !overlaps.is_empty() {
            analysis.overwritten_clusters.push(cluster);
            let owners = analysis.overwritten_by.entry(cluster).or_default();
            for (a, b) in overlaps {
                for usage in [a, b] {
                    if usage.file_id != file_id && !owners.contains(&usage.file_id) {
                        owners.push(usage.file_id);
                    }
                }
            }
        }

        offset += bytes_per_cluster;
    }

    if !analysis.overwritten_clusters.is_empty() {
        analysis.overwrite_fraction =
            analysis.overwritten_clusters.len() as f64 / expected_clusters as f64;
    }

    analysis
}

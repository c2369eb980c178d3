//! Allocation history across candidates.
//!
//! Records which deleted file claimed which cluster at which write offset,
//! so the analyzer can tell when two deleted files both reference the same
//! cluster and one of them has been partially overwritten.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded claim of a cluster by a candidate file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUsage {
    pub timestamp: DateTime<Utc>,
    pub file_id: u16,
    /// Byte offset within the claiming file where this cluster sits.
    pub write_offset: u64,
}

/// Append-only map from cluster index to its recorded usages.
///
/// Usages are appended in cluster-chain order and never rewritten, which
/// gives the usages of a cluster a well-defined earlier-than relation.
#[derive(Debug, Default)]
pub struct AllocationHistory {
    usages: BTreeMap<u64, Vec<ClusterUsage>>,
}

impl AllocationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a usage for `cluster`, stamped with the current time.
    pub fn record(&mut self, cluster: u64, file_id: u16, write_offset: u64) {
        self.usages.entry(cluster).or_default().push(ClusterUsage {
            timestamp: Utc::now(),
            file_id,
            write_offset,
        });
    }

    /// All unordered pairs of usages of `cluster` with distinct file ids.
    ///
    /// O(k²) in the number of usages per cluster; k is bounded by the number
    /// of candidates a directory scan can produce.
    pub fn overlapping_usages(&self, cluster: u64) -> Vec<(ClusterUsage, ClusterUsage)> {
        let mut overlaps = Vec::new();
        let Some(history) = self.usages.get(&cluster) else {
            return overlaps;
        };
        for i in 0..history.len() {
            for j in i + 1..history.len() {
                if history[i].file_id != history[j].file_id {
                    overlaps.push((history[i].clone(), history[j].clone()));
                }
            }
        }
        overlaps
    }

    /// Number of clusters with at least one recorded usage.
    pub fn tracked_clusters(&self) -> usize {
        self.usages.len()
    }
}
